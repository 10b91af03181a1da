use crate::error::Result;
use crate::signaling::messages::{ClientMessage, ServerMessage};
use async_trait::async_trait;

/// Inbound side of a signaling link. `Disconnected` is always the last event.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(ServerMessage),
    Disconnected { reason: String },
}

/// Duplex channel to the discovery/relay service
#[async_trait]
pub trait SignalingLink: Send + Sync {
    /// Fails with `Link` once the connection is gone
    async fn send(&self, message: ClientMessage) -> Result<()>;

    fn is_connected(&self) -> bool;
}
