//! Typed event surface emitted by the core
//!
//! Each component owns its event channel per instance; consumers hold
//! explicit receivers. There are no process-wide registries.

use crate::error::PeerError;
use crate::media::MediaStreamHandle;
use serde::{Deserialize, Serialize};

/// Opaque participant identity, unique per connected user and stable for the
/// duration of a call.
pub type ParticipantId = String;

/// Media kind of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Audio-only call
    Audio,
    /// Audio plus video call
    Video,
}

/// Call lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Call placed, awaiting remote accept
    Outgoing,
    /// Call received, awaiting local accept or reject
    Incoming,
    /// Call connected and running
    Active,
    /// Teardown in progress
    Ending,
}

/// Events emitted by [`CallController`](crate::CallController) to the
/// embedding presentation layer.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Local capture stream became available
    LocalStream(MediaStreamHandle),

    /// A remote participant's media stream arrived
    RemoteStream {
        /// Remote participant
        peer_id: ParticipantId,
        /// The remote stream, exclusively owned by that peer's session
        stream: MediaStreamHandle,
    },

    /// A remote participant left or lost connectivity
    PeerDisconnected {
        /// Remote participant
        peer_id: ParticipantId,
    },

    /// The call moved to a new lifecycle state
    StateChanged(CallState),

    /// One participant failed without affecting the rest of the call
    PeerError {
        /// Remote participant
        peer_id: ParticipantId,
        /// Why the participant was dropped
        reason: PeerError,
    },

    /// Screen sharing stopped outside the application (OS-level UI)
    ScreenShareEnded,

    /// One second of active call time elapsed; carries the running total
    DurationTick(u64),
}

/// Transport-level notifications from
/// [`SignalingTransport`](crate::SignalingTransport).
///
/// Business events (call requests, signal relays) are delivered through
/// `subscribe` instead; this channel only reports the health of the channel
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Channel established or re-established
    Connected,

    /// Channel dropped; reconnection may follow
    Disconnected,

    /// All reconnect attempts failed; no further attempts will be made until
    /// `connect` is called again
    ReconnectExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_kind_serialization() {
        let json = serde_json::to_string(&CallKind::Video).unwrap();
        assert_eq!(json, "\"video\"");
        let parsed: CallKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, CallKind::Video);
    }

    #[test]
    fn test_call_state_roundtrip() {
        for state in [
            CallState::Idle,
            CallState::Outgoing,
            CallState::Incoming,
            CallState::Active,
            CallState::Ending,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            let parsed: CallState = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, state);
        }
    }
}
