pub mod connection;
pub mod ice;
pub mod negotiator;
pub mod types;

pub use connection::{WebRtcNegotiator, WebRtcNegotiatorFactory};
pub use negotiator::{Negotiator, NegotiatorFactory};
pub use types::{
    LocalMedia, MediaKind, NegotiatorEvent, NetworkCandidate, RemoteStream, RemoteTrack,
    SdpType, SessionDescription, TransportState,
};
