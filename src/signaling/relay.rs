//! In-process stand-in for the relay server. Routes messages between links the
//! same way the websocket relay does: identities are handed out on connect,
//! room tokens resolve to the identity that registered them, and every
//! forwarded message is stamped with the sender.

use crate::error::{CallError, Result};
use crate::identity::{Identity, RoomToken};
use crate::signaling::link::{LinkEvent, SignalingLink};
use crate::signaling::messages::{ClientMessage, ServerMessage};
use crate::utils::random_id;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
pub struct LocalRelay {
    inner: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    peers: HashMap<Identity, RelayPeer>,
    tokens: HashMap<RoomToken, Identity>,
    sent: Vec<(Identity, ClientMessage)>,
}

struct RelayPeer {
    events: mpsc::UnboundedSender<LinkEvent>,
    connected: Arc<AtomicBool>,
}

/// One client's connection to a [`LocalRelay`]
pub struct RelayLink {
    identity: Identity,
    relay: LocalRelay,
    connected: Arc<AtomicBool>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a link; `assigned-identity` is the first event on the returned stream
    pub fn connect(&self) -> (Arc<RelayLink>, mpsc::UnboundedReceiver<LinkEvent>) {
        let identity = Identity::new(random_id());
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let _ = tx.send(LinkEvent::Message(ServerMessage::AssignedIdentity {
            identity: identity.clone(),
        }));
        self.state().peers.insert(
            identity.clone(),
            RelayPeer {
                events: tx,
                connected: connected.clone(),
            },
        );
        info!(%identity, "relay: client connected");

        let link = Arc::new(RelayLink {
            identity,
            relay: self.clone(),
            connected,
        });
        (link, rx)
    }

    /// Drops a client as if its connection died. Returns false if it was not connected.
    pub fn disconnect(&self, identity: &Identity, reason: &str) -> bool {
        let mut state = self.state();
        let Some(peer) = state.peers.remove(identity) else {
            return false;
        };
        state.tokens.retain(|_, owner| owner != identity);
        peer.connected.store(false, Ordering::Release);
        let _ = peer.events.send(LinkEvent::Disconnected {
            reason: reason.to_string(),
        });
        info!(%identity, reason, "relay: client disconnected");
        true
    }

    /// Everything `identity` has sent through the relay, in order
    pub fn sent_by(&self, identity: &Identity) -> Vec<ClientMessage> {
        self.state()
            .sent
            .iter()
            .filter(|(from, _)| from == identity)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.state().peers.len()
    }

    fn route(&self, sender: &Identity, message: ClientMessage) -> Result<()> {
        let mut state = self.state();
        if !state.peers.contains_key(sender) {
            return Err(CallError::Link(format!("{sender} is not connected")));
        }
        state.sent.push((sender.clone(), message.clone()));

        let from = sender.clone();
        let (to, forwarded) = match message {
            ClientMessage::RegisterToken { token } => {
                debug!(%token, identity = %sender, "relay: token registered");
                state.tokens.insert(token, sender.clone());
                return Ok(());
            }
            ClientMessage::CallUser {
                to, signal, name, ..
            } => (to, ServerMessage::IncomingOffer { from, signal, name }),
            ClientMessage::AnswerCall { to, signal, name } => (
                to.to_string(),
                ServerMessage::AnswerReceived {
                    signal,
                    name,
                    from: Some(from),
                },
            ),
            ClientMessage::Candidate { to, candidate } => (
                to.to_string(),
                ServerMessage::CandidateReceived {
                    candidate,
                    from: Some(from),
                },
            ),
            ClientMessage::DeclineCall { to, reason } => {
                (to.to_string(), ServerMessage::CallDeclined { from, reason })
            }
            ClientMessage::EndCall { to } => (to.to_string(), ServerMessage::CallEnded { from }),
        };

        let recipient = state
            .tokens
            .get(&RoomToken::new(to.as_str()))
            .cloned()
            .unwrap_or_else(|| Identity::new(to.as_str()));

        match state.peers.get(&recipient) {
            Some(peer) => {
                debug!(event = forwarded.event_name(), %sender, %recipient, "relay: forwarding");
                let _ = peer.events.send(LinkEvent::Message(forwarded));
            }
            None => warn!(
                event = forwarded.event_name(),
                %sender,
                to = %to,
                "relay: no such recipient, message dropped"
            ),
        }
        Ok(())
    }
}

impl RelayLink {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl SignalingLink for RelayLink {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(CallError::Link(format!(
                "cannot send {}: link is disconnected",
                message.event_name()
            )));
        }
        self.relay.route(&self.identity, message)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
