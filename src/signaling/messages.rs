use crate::identity::{Identity, RoomToken};
use crate::peer::types::{NetworkCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeclineReason {
    Declined,
    Busy,
}

/// Client → relay. Envelope: `{"event": "call-user", "data": {...}}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    CallUser {
        /// Room token or identity
        to: String,
        signal: SessionDescription,
        from: Identity,
        name: String,
    },
    AnswerCall {
        to: Identity,
        signal: SessionDescription,
        name: String,
    },
    Candidate {
        to: Identity,
        candidate: NetworkCandidate,
    },
    RegisterToken {
        token: RoomToken,
    },
    DeclineCall {
        to: Identity,
        reason: DeclineReason,
    },
    EndCall {
        to: Identity,
    },
}

/// Relay → client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    AssignedIdentity {
        identity: Identity,
    },
    IncomingOffer {
        from: Identity,
        signal: SessionDescription,
        name: String,
    },
    AnswerReceived {
        signal: SessionDescription,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<Identity>,
    },
    CandidateReceived {
        candidate: NetworkCandidate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<Identity>,
    },
    CallDeclined {
        from: Identity,
        reason: DeclineReason,
    },
    CallEnded {
        from: Identity,
    },
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::CallUser { .. } => "call-user",
            ClientMessage::AnswerCall { .. } => "answer-call",
            ClientMessage::Candidate { .. } => "candidate",
            ClientMessage::RegisterToken { .. } => "register-token",
            ClientMessage::DeclineCall { .. } => "decline-call",
            ClientMessage::EndCall { .. } => "end-call",
        }
    }

    /// Address the relay forwards this message to, if any
    pub fn recipient(&self) -> Option<&str> {
        match self {
            ClientMessage::CallUser { to, .. } => Some(to.as_str()),
            ClientMessage::AnswerCall { to, .. }
            | ClientMessage::Candidate { to, .. }
            | ClientMessage::DeclineCall { to, .. }
            | ClientMessage::EndCall { to } => Some(to.as_str()),
            ClientMessage::RegisterToken { .. } => None,
        }
    }
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::AssignedIdentity { .. } => "assigned-identity",
            ServerMessage::IncomingOffer { .. } => "incoming-offer",
            ServerMessage::AnswerReceived { .. } => "answer-received",
            ServerMessage::CandidateReceived { .. } => "candidate-received",
            ServerMessage::CallDeclined { .. } => "call-declined",
            ServerMessage::CallEnded { .. } => "call-ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_user_envelope() {
        let msg = ClientMessage::CallUser {
            to: "ab12cd34".into(),
            signal: SessionDescription::offer("v=0"),
            from: Identity::new("c1"),
            name: "Ana".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "event": "call-user",
                "data": {
                    "to": "ab12cd34",
                    "signal": {"type": "offer", "sdp": "v=0"},
                    "from": "c1",
                    "name": "Ana"
                }
            })
        );
        assert_eq!(msg.recipient(), Some("ab12cd34"));
    }

    #[test]
    fn parses_relay_events() {
        let assigned: ServerMessage = serde_json::from_value(json!({
            "event": "assigned-identity",
            "data": {"identity": "Xy9_socket"}
        }))
        .unwrap();
        assert_eq!(
            assigned,
            ServerMessage::AssignedIdentity {
                identity: Identity::new("Xy9_socket")
            }
        );

        // relays that do not know the sender omit `from`
        let answer: ServerMessage = serde_json::from_value(json!({
            "event": "answer-received",
            "data": {"signal": {"type": "answer", "sdp": "v=0"}, "name": "Bo"}
        }))
        .unwrap();
        assert_eq!(
            answer,
            ServerMessage::AnswerReceived {
                signal: SessionDescription::answer("v=0"),
                name: "Bo".into(),
                from: None,
            }
        );
    }

    #[test]
    fn teardown_extensions() {
        let decline = ClientMessage::DeclineCall {
            to: Identity::new("c1"),
            reason: DeclineReason::Busy,
        };
        assert_eq!(
            serde_json::to_string(&decline).unwrap(),
            r#"{"event":"decline-call","data":{"to":"c1","reason":"busy"}}"#
        );

        let ended: ServerMessage =
            serde_json::from_str(r#"{"event":"call-ended","data":{"from":"c2"}}"#).unwrap();
        assert_eq!(ended.event_name(), "call-ended");
    }

    #[test]
    fn unknown_event_is_rejected() {
        let parsed = serde_json::from_str::<ServerMessage>(r#"{"event":"me","data":"abc"}"#);
        assert!(parsed.is_err());
    }
}
