//! Two-party call signaling: a state machine that tracks who is calling whom,
//! negotiates session descriptions over a signaling relay, trickles network
//! candidates, and tears the call down cleanly.

pub mod call;
pub mod config;
pub mod error;
pub mod identity;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
mod utils;

pub use call::{CallController, CallHandle, CallNotice, CallStateMachine};
pub use config::{CallPolicy, ClientConfig};
pub use error::{CallError, ConfigError, Result};
pub use identity::{Identity, IdentityRegistry, RoomToken};
pub use peer::{LocalMedia, RemoteStream, WebRtcNegotiatorFactory};
pub use session::{CallId, CallSnapshot, CallState};
pub use signaling::{LocalRelay, SignalingLink, WebSocketLink};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Connects to the configured relay and starts a call controller backed by webrtc.
/// `media` is attached to every call; pass `LocalMedia::default()` to receive only.
pub async fn start(
    config: ClientConfig,
    media: LocalMedia,
) -> Result<(CallHandle, JoinHandle<()>)> {
    logger::init_logging(&config.logging);
    info!(
        host = %config.signaling.host,
        port = config.signaling.port,
        tls = config.signaling.tls,
        "starting peercall"
    );

    let (link, link_events) = WebSocketLink::connect(&config.signaling).await?;
    let factory = WebRtcNegotiatorFactory::new(config.ice_servers.clone())?;
    let (machine, negotiator_events) =
        CallStateMachine::new(link, Arc::new(factory), media, config.call.clone());
    let (controller, handle) = CallController::new(machine, negotiator_events, link_events);

    Ok((handle, controller.spawn()))
}
