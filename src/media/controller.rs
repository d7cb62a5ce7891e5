//! Single owner of local capture and screen-share devices

use super::devices::MediaDevices;
use super::stream::{MediaStreamHandle, StreamSource};
use crate::config::MediaConstraints;
use crate::error::MediaError;
use crate::events::CallKind;
use crate::peer::PeerSession;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Which source currently feeds outgoing video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VideoSource {
    Camera,
    Screen,
}

/// Local media state, mutated only by [`MediaController`].
#[derive(Debug)]
struct LocalMediaState {
    capture: Option<MediaStreamHandle>,
    screen: Option<MediaStreamHandle>,
    audio_enabled: bool,
    video_enabled: bool,
    video_source: VideoSource,
}

impl Default for LocalMediaState {
    fn default() -> Self {
        Self {
            capture: None,
            screen: None,
            audio_enabled: false,
            video_enabled: false,
            video_source: VideoSource::Camera,
        }
    }
}

/// Owner of all local capture and screen-share sources.
///
/// Peer sessions never touch raw devices; every track mutation funnels
/// through here. At most one capture stream and one screen stream are live at
/// a time, and replacing the outgoing video source updates every live session
/// before the previous source is released.
pub struct MediaController {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    state: Mutex<LocalMediaState>,
}

impl MediaController {
    /// Create a controller over the given device capability
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            devices,
            constraints,
            state: Mutex::new(LocalMediaState::default()),
        }
    }

    /// Acquire microphone (and camera for video calls) under the configured
    /// bounded constraints.
    ///
    /// A failed video acquisition is retried once with audio-only
    /// constraints; a failed audio-only acquisition is reported as
    /// [`MediaError::Denied`] with no further fallback.
    pub async fn acquire_camera(&self, kind: CallKind) -> Result<MediaStreamHandle, MediaError> {
        let constraints = match kind {
            CallKind::Video => self.constraints.clone(),
            CallKind::Audio => self.constraints.audio_only(),
        };

        let stream = match self.devices.acquire_capture(&constraints).await {
            Ok(stream) => stream,
            Err(e) if kind == CallKind::Video => {
                warn!("video capture failed ({}), retrying audio-only", e);
                self.devices
                    .acquire_capture(&constraints.audio_only())
                    .await
                    .map_err(|e| {
                        warn!("audio-only fallback failed: {}", e);
                        MediaError::Denied
                    })?
            }
            Err(e) => {
                warn!("audio capture failed: {}", e);
                return Err(MediaError::Denied);
            }
        };

        info!(
            stream_id = %stream.id(),
            has_audio = stream.audio_track().is_some(),
            has_video = stream.video_track().is_some(),
            "local capture acquired"
        );

        Ok(stream)
    }

    /// Adopt an acquired capture stream as the live local media.
    ///
    /// Acquisition and adoption are separate steps so a caller that cancelled
    /// mid-acquisition can drop the late result without it ever touching
    /// shared state.
    pub async fn install_capture(&self, stream: &MediaStreamHandle) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.capture.take() {
            if previous.id() != stream.id() {
                debug!("replacing existing capture stream {}", previous.id());
                previous.stop();
            }
        }
        state.audio_enabled = stream.audio_track().is_some();
        state.video_enabled = stream.video_track().is_some();
        state.video_source = VideoSource::Camera;
        state.capture = Some(stream.clone());
    }

    /// Acquire a screen or window capture source.
    ///
    /// The returned stream's ended watch fires if sharing is stopped through
    /// the OS-level UI; the call controller routes that into the same stop
    /// path as an in-app stop.
    pub async fn acquire_screen(&self) -> Result<MediaStreamHandle, MediaError> {
        let stream = self.devices.acquire_display().await?;
        info!(stream_id = %stream.id(), "screen capture acquired");
        Ok(stream)
    }

    /// Flip the local audio track's enabled flag; returns the new state, or
    /// `false` if no audio track exists.
    pub async fn toggle_audio(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(track) = state.capture.as_ref().and_then(|s| s.audio_track()) else {
            return false;
        };
        let enabled = track.set_enabled(!track.is_enabled());
        state.audio_enabled = enabled;
        enabled
    }

    /// Flip the local video track's enabled flag; returns the new state, or
    /// `false` if no video track exists.
    pub async fn toggle_video(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(track) = state.capture.as_ref().and_then(|s| s.video_track()) else {
            return false;
        };
        let enabled = track.set_enabled(!track.is_enabled());
        state.video_enabled = enabled;
        enabled
    }

    /// Move every live session's outgoing video onto `new_stream`, then
    /// release the previous video source.
    ///
    /// The previous track is not stopped until every `Connected`/`Degraded`
    /// session has moved onto the new one, so remote sides never observe a
    /// gap between sources. Used for camera switches and for screen-share
    /// start/stop.
    pub async fn switch_outgoing_video_source(
        &self,
        new_stream: MediaStreamHandle,
        sessions: &[Arc<PeerSession>],
    ) -> Result<(), MediaError> {
        let new_track = new_stream
            .video_track()
            .ok_or_else(|| MediaError::Unavailable("stream has no video track".to_string()))?;

        for session in sessions {
            if !session.is_live().await {
                continue;
            }
            if let Err(e) = session.replace_outgoing_video_track(&new_track).await {
                // Scoped to the one peer; the switch itself continues.
                warn!(peer_id = %session.peer_id(), "track replacement failed: {}", e);
            }
        }

        let mut state = self.state.lock().await;

        match state.video_source {
            VideoSource::Screen => {
                if let Some(old) = state.screen.take() {
                    if old.id() != new_stream.id() {
                        debug!("releasing screen stream {}", old.id());
                        old.stop();
                    }
                }
            }
            VideoSource::Camera => {
                if let Some(old_video) = state.capture.as_ref().and_then(|s| s.video_track()) {
                    if old_video.id() != new_track.id() {
                        debug!("releasing camera video track {}", old_video.id());
                        old_video.stop();
                    }
                }
            }
        }

        match new_stream.source() {
            StreamSource::Screen => {
                state.screen = Some(new_stream);
                state.video_source = VideoSource::Screen;
            }
            _ => {
                // Fold the new video track into the capture stream so every
                // holder of the capture handle sees the current camera.
                match state.capture.as_ref() {
                    Some(capture) if capture.id() != new_stream.id() => {
                        capture.set_video_track(new_track);
                    }
                    Some(_) => {}
                    None => state.capture = Some(new_stream),
                }
                state.video_enabled = true;
                state.video_source = VideoSource::Camera;
            }
        }

        Ok(())
    }

    /// Start screen sharing: acquire a display source and move all live
    /// sessions onto it. Idempotent while a share is active.
    pub async fn start_screen_share(
        &self,
        sessions: &[Arc<PeerSession>],
    ) -> Result<MediaStreamHandle, MediaError> {
        if let Some(existing) = self.screen_stream().await {
            debug!("screen share already active");
            return Ok(existing);
        }

        let screen = self.acquire_screen().await?;
        self.switch_outgoing_video_source(screen.clone(), sessions)
            .await?;
        Ok(screen)
    }

    /// Stop screen sharing and restore the camera track the same way the
    /// share started: replace on all live sessions first, release the screen
    /// stream after. No-op when no share is active.
    pub async fn stop_screen_share(
        &self,
        sessions: &[Arc<PeerSession>],
    ) -> Result<(), MediaError> {
        let (screen_active, had_camera_video) = {
            let state = self.state.lock().await;
            (
                state.screen.is_some(),
                state.capture.as_ref().and_then(|s| s.video_track()).is_some(),
            )
        };

        if !screen_active {
            return Ok(());
        }

        if had_camera_video {
            let camera = self
                .devices
                .acquire_capture(&self.constraints.video_only())
                .await?;
            self.switch_outgoing_video_source(camera, sessions).await?;
        } else {
            // Audio-only call: nothing to restore, just release the share.
            let mut state = self.state.lock().await;
            if let Some(screen) = state.screen.take() {
                screen.stop();
            }
            state.video_source = VideoSource::Camera;
        }

        Ok(())
    }

    /// Stop a screen stream that lost its call before the share settled.
    ///
    /// Unlike [`stop_screen_share`](Self::stop_screen_share) this never
    /// re-acquires a camera; it only drops the stray stream.
    pub async fn discard_screen(&self, stream: &MediaStreamHandle) {
        let mut state = self.state.lock().await;
        if let Some(screen) = state.screen.take() {
            if screen.id() == stream.id() {
                state.video_source = VideoSource::Camera;
            } else {
                state.screen = Some(screen);
            }
        }
        stream.stop();
    }

    /// Stop and release every held stream
    pub async fn release_all(&self) {
        let mut state = self.state.lock().await;
        if let Some(capture) = state.capture.take() {
            capture.stop();
        }
        if let Some(screen) = state.screen.take() {
            screen.stop();
        }
        state.audio_enabled = false;
        state.video_enabled = false;
        state.video_source = VideoSource::Camera;
        debug!("all local media released");
    }

    /// The current capture stream, if any
    pub async fn local_stream(&self) -> Option<MediaStreamHandle> {
        self.state.lock().await.capture.clone()
    }

    /// The current screen stream, if any
    pub async fn screen_stream(&self) -> Option<MediaStreamHandle> {
        self.state.lock().await.screen.clone()
    }

    /// Whether a screen share is currently active
    pub async fn is_screen_active(&self) -> bool {
        self.state.lock().await.screen.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, TrackKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Device double with scriptable failures
    struct FakeDevices {
        fail_video: bool,
        fail_all: bool,
        capture_calls: AtomicU32,
    }

    impl FakeDevices {
        fn new() -> Self {
            Self {
                fail_video: false,
                fail_all: false,
                capture_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaDevices for FakeDevices {
        async fn acquire_capture(
            &self,
            constraints: &MediaConstraints,
        ) -> Result<MediaStreamHandle, MediaError> {
            self.capture_calls.fetch_add(1, Ordering::SeqCst);

            if self.fail_all || (self.fail_video && constraints.video) {
                return Err(MediaError::Denied);
            }

            let mut tracks = Vec::new();
            if constraints.audio {
                tracks.push(MediaTrack::new(TrackKind::Audio));
            }
            if constraints.video {
                tracks.push(MediaTrack::new(TrackKind::Video));
            }
            Ok(MediaStreamHandle::new(StreamSource::Capture, tracks))
        }

        async fn acquire_display(&self) -> Result<MediaStreamHandle, MediaError> {
            Ok(MediaStreamHandle::new(
                StreamSource::Screen,
                vec![MediaTrack::new(TrackKind::Video)],
            ))
        }
    }

    fn controller(devices: FakeDevices) -> MediaController {
        MediaController::new(Arc::new(devices), MediaConstraints::default())
    }

    #[tokio::test]
    async fn test_acquire_and_install() {
        let mc = controller(FakeDevices::new());
        let stream = mc.acquire_camera(CallKind::Video).await.unwrap();

        assert!(stream.audio_track().is_some());
        assert!(stream.video_track().is_some());
        // Acquisition alone does not touch shared state
        assert!(mc.local_stream().await.is_none());

        mc.install_capture(&stream).await;
        assert!(mc.local_stream().await.is_some());
    }

    #[tokio::test]
    async fn test_install_replaces_previous_capture() {
        let mc = controller(FakeDevices::new());
        let first = mc.acquire_camera(CallKind::Video).await.unwrap();
        mc.install_capture(&first).await;

        let second = mc.acquire_camera(CallKind::Video).await.unwrap();
        mc.install_capture(&second).await;

        assert!(first.is_stopped());
        assert!(!second.is_stopped());
    }

    #[tokio::test]
    async fn test_video_failure_falls_back_to_audio_only() {
        let devices = FakeDevices {
            fail_video: true,
            ..FakeDevices::new()
        };
        let mc = controller(devices);

        let stream = mc.acquire_camera(CallKind::Video).await.unwrap();
        assert!(stream.audio_track().is_some());
        assert!(stream.video_track().is_none());
    }

    #[tokio::test]
    async fn test_audio_failure_is_denied_without_fallback() {
        let devices = Arc::new(FakeDevices {
            fail_all: true,
            ..FakeDevices::new()
        });
        let mc = MediaController::new(devices.clone(), MediaConstraints::default());

        let err = mc.acquire_camera(CallKind::Audio).await.unwrap_err();
        assert_eq!(err, MediaError::Denied);
        // One attempt only for audio requests
        assert_eq!(devices.capture_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_video_failure_attempts_exactly_one_fallback() {
        let devices = Arc::new(FakeDevices {
            fail_all: true,
            ..FakeDevices::new()
        });
        let mc = MediaController::new(devices.clone(), MediaConstraints::default());

        let err = mc.acquire_camera(CallKind::Video).await.unwrap_err();
        assert_eq!(err, MediaError::Denied);
        assert_eq!(devices.capture_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_toggle_without_stream_is_noop() {
        let mc = controller(FakeDevices::new());
        assert!(!mc.toggle_audio().await);
        assert!(!mc.toggle_video().await);
    }

    #[tokio::test]
    async fn test_toggle_flips_enabled() {
        let mc = controller(FakeDevices::new());
        let stream = mc.acquire_camera(CallKind::Video).await.unwrap();
        mc.install_capture(&stream).await;

        assert!(!mc.toggle_audio().await);
        assert!(!stream.audio_track().unwrap().is_enabled());
        assert!(mc.toggle_audio().await);
        assert!(stream.audio_track().unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_switch_releases_old_camera_track_only() {
        let mc = controller(FakeDevices::new());
        let capture = mc.acquire_camera(CallKind::Video).await.unwrap();
        mc.install_capture(&capture).await;
        let old_video = capture.video_track().unwrap();
        let audio = capture.audio_track().unwrap();

        let screen = mc.acquire_screen().await.unwrap();
        mc.switch_outgoing_video_source(screen.clone(), &[])
            .await
            .unwrap();

        assert!(old_video.is_stopped());
        assert!(!audio.is_stopped());
        assert!(mc.is_screen_active().await);
    }

    #[tokio::test]
    async fn test_stop_screen_share_restores_camera() {
        let mc = controller(FakeDevices::new());
        let capture = mc.acquire_camera(CallKind::Video).await.unwrap();
        mc.install_capture(&capture).await;

        let screen = mc.start_screen_share(&[]).await.unwrap();
        assert!(mc.is_screen_active().await);

        mc.stop_screen_share(&[]).await.unwrap();
        assert!(!mc.is_screen_active().await);
        assert!(screen.is_stopped());
        // The capture handle carries a fresh, live video track again
        let video = capture.video_track().unwrap();
        assert!(!video.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_screen_share_without_share_is_noop() {
        let mc = controller(FakeDevices::new());
        assert!(mc.stop_screen_share(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_all() {
        let mc = controller(FakeDevices::new());
        let capture = mc.acquire_camera(CallKind::Video).await.unwrap();
        mc.install_capture(&capture).await;
        let screen = mc.start_screen_share(&[]).await.unwrap();

        mc.release_all().await;

        assert!(capture.is_stopped());
        assert!(screen.is_stopped());
        assert!(mc.local_stream().await.is_none());
        assert!(mc.screen_stream().await.is_none());
    }
}
