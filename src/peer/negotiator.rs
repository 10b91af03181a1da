use crate::error::Result;
use crate::peer::types::{LocalMedia, NegotiatorEvent, NetworkCandidate, SessionDescription};
use crate::session::CallId;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Owns exactly one underlying peer connection for one call.
///
/// Local candidates, the remote stream and transport state changes are not
/// returned from these methods; they arrive on the event channel handed to
/// [`NegotiatorFactory::create`], tagged with the owning [`CallId`].
#[async_trait]
pub trait Negotiator: Send + Sync {
    fn call_id(&self) -> &CallId;

    /// Generates the local offer and sets it as local description.
    /// Not idempotent: call at most once per call.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Sets `remote_offer` as remote description, then generates and sets the local answer
    async fn create_answer(&self, remote_offer: &SessionDescription) -> Result<SessionDescription>;

    /// Fails with `Negotiation` when no local offer is outstanding
    async fn apply_remote_answer(&self, answer: &SessionDescription) -> Result<()>;

    /// Fails with `Transport` once the connection is closed
    async fn add_remote_candidate(&self, candidate: NetworkCandidate) -> Result<()>;

    /// Releases the connection. Safe to call on a closed negotiator.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Builds one negotiator per call
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    async fn create(
        &self,
        call_id: CallId,
        media: LocalMedia,
        events: mpsc::UnboundedSender<NegotiatorEvent>,
    ) -> Result<Box<dyn Negotiator>>;
}
