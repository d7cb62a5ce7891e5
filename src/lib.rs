//! Real-time call signaling and peer-session orchestration
//!
//! This crate is the call core of a collaboration application: it
//! establishes, maintains, and tears down live audio/video/screen-share
//! sessions between participants. It coordinates a persistent signaling
//! channel, per-peer connection negotiation, media track lifecycle, and
//! failure recovery under partial connectivity.
//!
//! # Features
//!
//! - **Call state machine**: idle → outgoing/incoming → active → ending,
//!   with bounded timeouts on every suspend point
//! - **Multi-peer fan-out**: one peer session per remote participant, keyed
//!   by id with replace-on-duplicate semantics
//! - **Self-healing signaling**: exponential backoff reconnection and a
//!   one-shot transport downgrade on first-dial failure
//! - **Gap-free track replacement**: camera switches and screen shares move
//!   every live session onto the new source before the old one is released
//! - **Capability seams**: the WebRTC stack, capture devices, and the wire
//!   dialer are traits supplied by the embedder
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Presentation layer (excluded)                           │
//! │  ↓ CallHandle commands     ↑ CallEvent stream            │
//! │  CallController (serialized event loop)                  │
//! │  ├─ SignalingTransport (typed events over a connector)   │
//! │  ├─ MediaController (sole owner of capture/screen)       │
//! │  └─ PeerSession per participant                          │
//! │      └─ PeerLink (opaque ICE/SDP capability)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use roomlink::CallConfig;
//!
//! let config = CallConfig::default();
//! assert!(config.validate().is_ok());
//! // Spec'd defaults: 20s connect ack, 30s peer negotiation,
//! // 15s accept-path media, 10s teardown.
//! assert_eq!(config.timeouts.peer_connect_secs, 30);
//! assert_eq!(config.reconnect.max_attempts, 5);
//! ```
//!
//! Wiring the controller requires the three capability implementations; see
//! `CallController::new` and the `webrtc-link` feature for a reference
//! [`PeerLink`] over the `webrtc` crate.

#![warn(clippy::all)]

pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod timer;

#[cfg(feature = "webrtc-link")]
pub mod link;

// Re-exports for the public API
pub use call::{CallController, CallHandle, CallSession, CallSnapshot, CallerInfo};
pub use config::{CallConfig, MediaConstraints, ReconnectPolicy, TimeoutConfig};
pub use error::{ConnectError, Error, MediaError, PeerError, ProtocolError, Result};
pub use events::{CallEvent, CallKind, CallState, ParticipantId, TransportEvent};
pub use media::{MediaController, MediaDevices, MediaStreamHandle, MediaTrack, StreamSource, TrackKind};
pub use peer::{
    ConnectionState, LinkEvent, LinkState, PeerLink, PeerLinkFactory, PeerSession, QualityReport,
    Role, SessionEvent,
};
pub use signaling::{
    SignalEvent, SignalHandler, SignalKind, SignalingChannel, SignalingConnector,
    SignalingTransport, SubscriptionId, WsConnector,
};

#[cfg(feature = "webrtc-link")]
pub use link::WebRtcLinkFactory;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
