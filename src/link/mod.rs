//! Reference [`PeerLink`](crate::PeerLink) over the `webrtc` crate
//!
//! Enabled with the `webrtc-link` feature. The core itself never depends on
//! a concrete ICE/SDP stack; this module exists so native embedders get a
//! working link without writing their own adapter.

mod webrtc_link;

pub use webrtc_link::{WebRtcLinkConfig, WebRtcLinkFactory};
