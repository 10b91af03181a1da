use crate::error::CallError;
use crate::identity::Identity;
use crate::peer::types::RemoteStream;
use crate::signaling::messages::DeclineReason;

/// Things the presentation layer should surface to the user.
/// State changes themselves are published as snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum CallNotice {
    IncomingCall {
        from: Identity,
        display_name: String,
    },
    /// A second offer arrived while busy and was turned away
    OfferRejected {
        from: Identity,
        display_name: String,
    },
    CallDeclined {
        from: Identity,
        reason: DeclineReason,
    },
    RemoteHungUp {
        from: Identity,
    },
    RemoteStreamReady(RemoteStream),
    NegotiationFailed(CallError),
    LinkLost {
        reason: String,
    },
    TransportFailed,
}
