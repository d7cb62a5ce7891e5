//! Signaling channel to the rendezvous server

mod connector;
mod protocol;
mod transport;

pub use connector::{SignalingChannel, SignalingConnector, WsConnector};
pub use protocol::{
    AckParams, ByeParams, CallRequestParams, ClientFrame, HelloParams, IncomingCallParams,
    PeerDisconnectedParams, PresenceParams, RejectParams, RoomParams, ServerFrame,
    SignalEvent, SignalKind, SignalRelayParams,
};
pub use transport::{SignalHandler, SignalingTransport, SubscriptionId};
