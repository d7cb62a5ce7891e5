//! Configuration types for the call orchestration core

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for [`CallController`](crate::CallController) and the
/// components it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Timeouts applied to every suspend point
    pub timeouts: TimeoutConfig,

    /// Signaling reconnection policy
    pub reconnect: ReconnectPolicy,

    /// Bounded constraints for local capture acquisition
    pub media: MediaConstraints,
}

/// Timeouts for every operation that can hang.
///
/// No operation in the core waits indefinitely on a device or the network;
/// each of these windows has a forced-fallback action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Signaling connect acknowledgment window in seconds (default: 20)
    pub connect_secs: u64,

    /// Per-peer negotiation window in seconds (default: 30)
    pub peer_connect_secs: u64,

    /// Local media acquisition window while accepting a call, in seconds
    /// (default: 15; on expiry the call is auto-rejected)
    pub accept_media_secs: u64,

    /// Call teardown window in seconds (default: 10; on expiry the
    /// controller force-returns to idle)
    pub cleanup_secs: u64,
}

/// Signaling reconnection policy.
///
/// Controls how reconnect attempts are made after an unexpected disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts (default: 5)
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds (default: 1000ms)
    pub backoff_initial_ms: u64,

    /// Maximum backoff delay in milliseconds (default: 30000ms)
    pub backoff_max_ms: u64,

    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
}

/// Bounded constraints for capture acquisition.
///
/// Passed to the device capability so acquisition never requests unbounded
/// resolution or frame rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Whether an audio track is requested
    pub audio: bool,

    /// Whether a video track is requested
    pub video: bool,

    /// Ideal capture width (default: 1280)
    pub width: u32,

    /// Ideal capture height (default: 720)
    pub height: u32,

    /// Maximum frame rate (default: 30)
    pub max_framerate: u32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            reconnect: ReconnectPolicy::default(),
            media: MediaConstraints::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 20,
            peer_connect_secs: 30,
            accept_media_secs: 15,
            cleanup_secs: 10,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            width: 1280,
            height: 720,
            max_framerate: 30,
        }
    }
}

impl TimeoutConfig {
    /// Connect acknowledgment window
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Per-peer negotiation window
    pub fn peer_connect(&self) -> Duration {
        Duration::from_secs(self.peer_connect_secs)
    }

    /// Accept-path media acquisition window
    pub fn accept_media(&self) -> Duration {
        Duration::from_secs(self.accept_media_secs)
    }

    /// Call teardown window
    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }
}

impl ReconnectPolicy {
    /// Calculate backoff duration for a given attempt number (0-indexed)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms =
            (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);
        Duration::from_millis(backoff_ms as u64)
    }

    /// Check if more attempts are allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl MediaConstraints {
    /// Constraints for an audio-only acquisition, used as the fallback when
    /// a combined audio/video request is denied.
    pub fn audio_only(&self) -> Self {
        Self {
            audio: true,
            video: false,
            ..self.clone()
        }
    }

    /// Constraints for a video-only acquisition, used when restoring the
    /// camera while the microphone is still held.
    pub fn video_only(&self) -> Self {
        Self {
            audio: false,
            video: true,
            ..self.clone()
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if any timeout window is zero, the reconnect policy
    /// allows no attempt, or the backoff progression cannot grow.
    pub fn validate(&self) -> Result<()> {
        if self.timeouts.connect_secs == 0
            || self.timeouts.peer_connect_secs == 0
            || self.timeouts.accept_media_secs == 0
            || self.timeouts.cleanup_secs == 0
        {
            return Err(Error::InvalidConfig(
                "timeout windows must be non-zero".to_string(),
            ));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.reconnect.backoff_initial_ms == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.backoff_initial_ms must be non-zero".to_string(),
            ));
        }

        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "reconnect.backoff_multiplier must be >= 1.0, got {}",
                self.reconnect.backoff_multiplier
            )));
        }

        if self.media.width == 0 || self.media.height == 0 || self.media.max_framerate == 0 {
            return Err(Error::InvalidConfig(
                "media constraints must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.connect(), Duration::from_secs(20));
        assert_eq!(config.timeouts.peer_connect(), Duration::from_secs(30));
        assert_eq!(config.timeouts.accept_media(), Duration::from_secs(15));
        assert_eq!(config.timeouts.cleanup(), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.calculate_backoff(4), Duration::from_millis(16000));
    }

    #[test]
    fn test_backoff_max_clamp() {
        let policy = ReconnectPolicy {
            backoff_max_ms: 5000,
            ..Default::default()
        };

        assert_eq!(policy.calculate_backoff(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_should_retry() {
        let policy = ReconnectPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!policy.should_retry(10));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = CallConfig::default();
        config.timeouts.cleanup_secs = 0;
        assert!(config.validate().is_err());

        let mut config = CallConfig::default();
        config.reconnect.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = CallConfig::default();
        config.reconnect.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_audio_only_constraints() {
        let constraints = MediaConstraints::default();
        let fallback = constraints.audio_only();
        assert!(fallback.audio);
        assert!(!fallback.video);
        assert_eq!(fallback.width, constraints.width);
    }
}
