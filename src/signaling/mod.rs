pub mod link;
pub mod messages;
pub mod relay;
pub mod websocket;

pub use link::{LinkEvent, SignalingLink};
pub use messages::{ClientMessage, DeclineReason, ServerMessage};
pub use relay::{LocalRelay, RelayLink};
pub use websocket::WebSocketLink;
