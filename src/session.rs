use crate::identity::{Identity, RoomToken};
use crate::peer::negotiator::Negotiator;
use crate::peer::types::{RemoteStream, SessionDescription};
use crate::utils::random_id;
use chrono::{DateTime, Utc};
use std::fmt;

/// Identifies one call attempt; negotiator events carry it so stale ones can be told apart
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    pub fn new() -> Self {
        CallId(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    OutgoingPending,
    IncomingOffered,
    Connected,
    Ended,
}

impl CallState {
    pub fn is_idle(self) -> bool {
        self == CallState::Idle
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::OutgoingPending => "outgoing-pending",
            CallState::IncomingOffered => "incoming-offered",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Offer held while the user decides
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOffer {
    pub from: Identity,
    pub display_name: String,
    pub description: SessionDescription,
    pub received_at: DateTime<Utc>,
}

/// The one call this client can be in. Replaced wholesale on reset, never cleared field by field.
#[derive(Default)]
pub struct CallSession {
    pub id: CallId,
    pub state: CallState,
    pub peer_identity: Option<Identity>,
    /// What the user dialled, token or identity
    pub peer_address: Option<String>,
    /// Set once the peer's identity is known for sure rather than resolved from a token
    pub peer_confirmed: bool,
    pub peer_display_name: Option<String>,
    pub pending_offer: Option<PendingOffer>,
    pub negotiator: Option<Box<dyn Negotiator>>,
    pub remote_stream: Option<RemoteStream>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Idle with nothing attached, as after `CallSession::new`
    pub fn is_pristine(&self) -> bool {
        self.is_idle()
            && self.peer_identity.is_none()
            && self.peer_address.is_none()
            && self.peer_display_name.is_none()
            && self.pending_offer.is_none()
            && self.negotiator.is_none()
            && self.remote_stream.is_none()
            && self.connected_at.is_none()
    }

    /// True when `from` can be the peer of this call
    pub fn is_peer(&self, from: Option<&Identity>) -> bool {
        match (from, &self.peer_identity) {
            (Some(from), Some(peer)) if self.peer_confirmed => from == peer,
            _ => true,
        }
    }

    pub fn snapshot(&self, local: Option<&Identity>, room_token: Option<&RoomToken>) -> CallSnapshot {
        CallSnapshot {
            call_id: (!self.is_idle()).then(|| self.id.clone()),
            state: self.state,
            local_identity: local.cloned(),
            room_token: room_token.cloned(),
            peer_identity: self.peer_identity.clone(),
            peer_display_name: self.peer_display_name.clone(),
            has_pending_offer: self.pending_offer.is_some(),
            has_negotiator: self.negotiator.is_some(),
            remote_stream: self.remote_stream.clone(),
            connected_at: self.connected_at,
        }
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("peer_identity", &self.peer_identity)
            .field("peer_display_name", &self.peer_display_name)
            .field("pending_offer", &self.pending_offer.is_some())
            .field("negotiator", &self.negotiator.is_some())
            .finish()
    }
}

/// Immutable view of the session published to the presentation layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallSnapshot {
    pub call_id: Option<CallId>,
    pub state: CallState,
    pub local_identity: Option<Identity>,
    pub room_token: Option<RoomToken>,
    pub peer_identity: Option<Identity>,
    pub peer_display_name: Option<String>,
    pub has_pending_offer: bool,
    pub has_negotiator: bool,
    pub remote_stream: Option<RemoteStream>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSnapshot {
    /// Session fields all at startup defaults
    pub fn is_cleared(&self) -> bool {
        self.state == CallState::Idle
            && self.call_id.is_none()
            && self.peer_identity.is_none()
            && self.peer_display_name.is_none()
            && !self.has_pending_offer
            && !self.has_negotiator
            && self.remote_stream.is_none()
            && self.connected_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_idle_and_cleared() {
        let session = CallSession::new();
        assert!(session.is_idle());
        assert!(session.snapshot(None, None).is_cleared());
    }

    #[test]
    fn idle_session_with_a_peer_is_not_pristine() {
        let mut session = CallSession::new();
        assert!(session.is_pristine());
        session.peer_identity = Some(Identity::new("ab12cd34"));
        assert!(session.is_idle());
        assert!(!session.is_pristine());
    }

    #[test]
    fn call_ids_differ() {
        assert_ne!(CallId::new(), CallId::new());
    }

    #[test]
    fn peer_match_before_and_after_confirmation() {
        let mut session = CallSession::new();
        session.state = CallState::OutgoingPending;
        session.peer_address = Some("ab12cd34".into());
        session.peer_identity = Some(Identity::new("ab12cd34"));

        // token not yet resolved: whoever answers is the peer
        assert!(session.is_peer(Some(&Identity::new("conn-2"))));

        session.peer_identity = Some(Identity::new("conn-2"));
        session.peer_confirmed = true;
        assert!(session.is_peer(Some(&Identity::new("conn-2"))));
        assert!(!session.is_peer(Some(&Identity::new("conn-9"))));
        assert!(session.is_peer(None));
    }

    #[test]
    fn state_names() {
        assert_eq!(CallState::OutgoingPending.to_string(), "outgoing-pending");
        assert_eq!(CallState::default(), CallState::Idle);
    }
}
