//! Device access capability
//!
//! The core never touches capture hardware directly; the embedding
//! application supplies an implementation of this trait (browser `gUM`
//! bindings, a native capture layer, or a test double).

use super::stream::MediaStreamHandle;
use crate::config::MediaConstraints;
use crate::error::MediaError;
use async_trait::async_trait;

/// Access to local capture and screen-share sources.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request microphone/camera access under bounded constraints.
    ///
    /// Implementations return [`MediaError::Denied`] on permission denial and
    /// [`MediaError::Unavailable`] on hardware failure; the fallback policy
    /// (retry video failures as audio-only) lives in the controller, not
    /// here.
    async fn acquire_capture(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStreamHandle, MediaError>;

    /// Request a screen or window capture source.
    ///
    /// The returned stream's ended watch must fire if the user stops sharing
    /// through the OS-level UI rather than through the application.
    async fn acquire_display(&self) -> Result<MediaStreamHandle, MediaError>;
}
