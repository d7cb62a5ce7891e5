//! Stream and track handles
//!
//! Handles are cheap clones over shared track state; stopping a track through
//! any clone is visible to every holder. The underlying device resources live
//! behind the [`MediaDevices`](super::MediaDevices) capability.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Microphone audio
    Audio,
    /// Camera or screen video
    Video,
}

/// Where a stream comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    /// Local capture devices (microphone, camera)
    Capture,
    /// Local screen or window share
    Screen,
    /// Media arriving from a remote participant
    Remote,
}

/// One audio or video track inside a stream
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    /// Create a new enabled track
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stable track identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track kind
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Whether the track currently produces media
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the enabled flag in place; returns the new state
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.store(enabled, Ordering::SeqCst);
        enabled
    }

    /// Stop the track and release its device binding. Irreversible.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether the track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Handle to a set of tracks from one source.
///
/// Clones share track state. The ended channel reports the source going away
/// outside the application, e.g. the user stopping a screen share through the
/// OS-level UI.
#[derive(Clone)]
pub struct MediaStreamHandle {
    id: String,
    source: StreamSource,
    tracks: Arc<RwLock<Vec<MediaTrack>>>,
    ended_tx: Arc<watch::Sender<bool>>,
}

impl MediaStreamHandle {
    /// Create a handle over the given tracks
    pub fn new(source: StreamSource, tracks: Vec<MediaTrack>) -> Self {
        let (ended_tx, _) = watch::channel(false);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            tracks: Arc::new(RwLock::new(tracks)),
            ended_tx: Arc::new(ended_tx),
        }
    }

    /// Stable stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the stream comes from
    pub fn source(&self) -> StreamSource {
        self.source
    }

    fn track_of(&self, kind: TrackKind) -> Option<MediaTrack> {
        let tracks = self.tracks.read().unwrap_or_else(|e| e.into_inner());
        tracks.iter().find(|t| t.kind() == kind).cloned()
    }

    /// The audio track, if any
    pub fn audio_track(&self) -> Option<MediaTrack> {
        self.track_of(TrackKind::Audio)
    }

    /// The video track, if any
    pub fn video_track(&self) -> Option<MediaTrack> {
        self.track_of(TrackKind::Video)
    }

    /// Add a track, replacing any existing track of the same kind. Returns
    /// the replaced track without stopping it; the caller decides when the
    /// old track is released.
    pub fn add_track(&self, track: MediaTrack) -> Option<MediaTrack> {
        let mut tracks = self.tracks.write().unwrap_or_else(|e| e.into_inner());
        let old = tracks
            .iter()
            .position(|t| t.kind() == track.kind())
            .map(|idx| tracks.remove(idx));
        tracks.push(track);
        old
    }

    /// Swap the video track for a new one, returning the previous track
    /// without stopping it.
    pub fn set_video_track(&self, track: MediaTrack) -> Option<MediaTrack> {
        self.add_track(track)
    }

    /// Stop every track in the stream. Safe to call multiple times.
    pub fn stop(&self) {
        let tracks = self.tracks.read().unwrap_or_else(|e| e.into_inner());
        for track in tracks.iter() {
            track.stop();
        }
    }

    /// Whether every track has been stopped
    pub fn is_stopped(&self) -> bool {
        let tracks = self.tracks.read().unwrap_or_else(|e| e.into_inner());
        tracks.iter().all(|t| t.is_stopped())
    }

    /// Mark the stream as ended by its source. Used by device
    /// implementations when the OS revokes or the user stops the source
    /// outside the application.
    pub fn notify_ended(&self) {
        let _ = self.ended_tx.send(true);
    }

    /// Watch for the source ending outside the application
    pub fn ended_watch(&self) -> watch::Receiver<bool> {
        self.ended_tx.subscribe()
    }
}

impl fmt::Debug for MediaStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracks = self.tracks.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MediaStreamHandle")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("tracks", &tracks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture_stream() -> MediaStreamHandle {
        MediaStreamHandle::new(
            StreamSource::Capture,
            vec![MediaTrack::new(TrackKind::Audio), MediaTrack::new(TrackKind::Video)],
        )
    }

    #[test]
    fn test_track_toggle() {
        let track = MediaTrack::new(TrackKind::Audio);
        assert!(track.is_enabled());
        assert!(!track.set_enabled(false));
        assert!(!track.is_enabled());
        assert!(track.set_enabled(true));
    }

    #[test]
    fn test_clones_share_track_state() {
        let stream = capture_stream();
        let clone = stream.clone();

        stream.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_set_video_track_returns_old() {
        let stream = capture_stream();
        let old_id = stream.video_track().map(|t| t.id().to_string());

        let replacement = MediaTrack::new(TrackKind::Video);
        let old = stream.set_video_track(replacement.clone());

        assert_eq!(old.map(|t| t.id().to_string()), old_id);
        assert_eq!(
            stream.video_track().map(|t| t.id().to_string()),
            Some(replacement.id().to_string())
        );
        // Audio track untouched
        assert!(stream.audio_track().is_some());
    }

    #[test]
    fn test_ended_watch() {
        let stream = MediaStreamHandle::new(
            StreamSource::Screen,
            vec![MediaTrack::new(TrackKind::Video)],
        );
        let mut watch = stream.ended_watch();
        assert!(!*watch.borrow());

        stream.notify_ended();
        assert!(watch.has_changed().unwrap());
        assert!(*watch.borrow_and_update());
    }
}
