//! Point-to-point media link capability
//!
//! The core drives ICE/SDP negotiation through this seam without knowing the
//! underlying stack. A reference implementation over `webrtc` ships behind
//! the `webrtc-link` feature; tests use in-memory doubles.

use crate::error::PeerError;
use crate::media::{MediaStreamHandle, MediaTrack};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Which side generates the first offer. Fixed at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Generates the initial offer
    Initiator,
    /// Answers the remote offer
    Responder,
}

/// Link-level connection state as reported by the underlying stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Negotiation in progress
    Connecting,
    /// Media is flowing
    Connected,
    /// The remote side went away
    Disconnected,
    /// Negotiation or transport failed
    Failed,
}

/// Connection quality sample reported by the link.
///
/// Drives the session's `Degraded` state; thresholds follow the usual
/// real-time media guidance (loss above 5% or round trips above 300ms make a
/// call noticeably bad).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    /// Fraction of packets lost (0.0 - 1.0)
    pub packet_loss: f64,
    /// Round-trip time in milliseconds
    pub rtt_ms: f64,
}

impl QualityReport {
    /// Whether this sample indicates degraded quality
    pub fn is_degraded(&self) -> bool {
        self.packet_loss > 0.05 || self.rtt_ms > 300.0
    }
}

/// Events surfaced by a [`PeerLink`]
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// An outgoing signaling payload (opaque SDP/ICE envelope) that must be
    /// relayed to the remote peer
    Signal(serde_json::Value),

    /// The link moved to a new connection state
    StateChanged(LinkState),

    /// The remote participant's media stream arrived
    RemoteStream(MediaStreamHandle),

    /// A fresh connection quality sample
    Quality(QualityReport),
}

/// One point-to-point media link to a single remote participant.
///
/// Implementations must not emit events before `begin_negotiation` is
/// called, so the owning session can subscribe without losing the first
/// offer.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Subscribe to link events
    fn events(&self) -> broadcast::Receiver<LinkEvent>;

    /// Start ICE/SDP negotiation. Initiators emit the first offer as a
    /// [`LinkEvent::Signal`]; responders wait for the remote offer.
    async fn begin_negotiation(&self) -> Result<(), PeerError>;

    /// Feed an inbound signaling payload into the link
    async fn ingest_signal(&self, payload: serde_json::Value) -> Result<(), PeerError>;

    /// Swap the outgoing video track in place, without renegotiation
    async fn replace_video_track(&self, track: MediaTrack) -> Result<(), PeerError>;

    /// Tear the link down. Must be safe to call more than once.
    async fn close(&self) -> Result<(), PeerError>;
}

/// Creates [`PeerLink`]s for new sessions.
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    /// Allocate a link to `peer_id` with the given negotiation role and
    /// optional local stream attached.
    async fn create_link(
        &self,
        peer_id: &str,
        role: Role,
        local_stream: Option<&MediaStreamHandle>,
    ) -> Result<Arc<dyn PeerLink>, PeerError>;
}
