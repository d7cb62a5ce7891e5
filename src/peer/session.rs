//! One peer session per remote participant

use super::link::{LinkEvent, LinkState, PeerLink, PeerLinkFactory, QualityReport, Role};
use crate::error::PeerError;
use crate::events::ParticipantId;
use crate::media::{MediaStreamHandle, MediaTrack};
use crate::timer::Deadline;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Negotiation in progress
    Connecting,
    /// Media is flowing
    Connected,
    /// Media is flowing but quality dropped; reversible
    Degraded,
    /// Terminal: closed, timed out, or remote disconnected
    Closed,
}

/// Events a session raises to its owning controller.
///
/// The session never mutates the call's participant map itself; it only
/// reports what happened.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An outgoing signaling payload to relay to this exact peer
    Signal {
        /// Target peer
        peer_id: ParticipantId,
        /// Opaque SDP/ICE envelope
        payload: serde_json::Value,
    },

    /// First successful media flow
    Connected {
        /// The peer that connected
        peer_id: ParticipantId,
    },

    /// Quality dropped below the acceptable threshold
    Degraded {
        /// The affected peer
        peer_id: ParticipantId,
    },

    /// Quality recovered
    Recovered {
        /// The recovered peer
        peer_id: ParticipantId,
    },

    /// The remote stream arrived
    RemoteStream {
        /// The peer the stream belongs to
        peer_id: ParticipantId,
        /// The remote stream, exclusively owned by this session
        stream: MediaStreamHandle,
    },

    /// The session failed; the owner decides whether to retry or drop the
    /// participant
    Failed {
        /// The failed peer
        peer_id: ParticipantId,
        /// Failure cause
        reason: PeerError,
    },

    /// The remote side went away after being connected
    Closed {
        /// The departed peer
        peer_id: ParticipantId,
    },
}

enum WatcherMsg {
    NegotiationTimeout,
}

/// Drives one peer-to-peer media connection to completion or failure.
///
/// State machine: `Connecting → Connected ⇄ Degraded → Closed`. A session
/// that does not reach `Connected` within the negotiation window closes
/// itself and reports a timeout.
pub struct PeerSession {
    peer_id: ParticipantId,
    role: Role,
    link: Arc<dyn PeerLink>,
    state: RwLock<ConnectionState>,
    local_stream: RwLock<Option<MediaStreamHandle>>,
    remote_stream: RwLock<Option<MediaStreamHandle>>,
    /// Id of the video track currently feeding the link
    current_video: RwLock<Option<String>>,
    deadline: std::sync::Mutex<Option<Deadline>>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
    created_at: Instant,
    connected_at: RwLock<Option<Instant>>,
}

impl PeerSession {
    /// Allocate the underlying link and immediately begin negotiation.
    ///
    /// Session events are delivered on `events`; the owner must relay
    /// [`SessionEvent::Signal`] payloads to the exact `peer_id` through
    /// signaling.
    pub async fn connect(
        peer_id: ParticipantId,
        role: Role,
        factory: &Arc<dyn PeerLinkFactory>,
        local_stream: Option<MediaStreamHandle>,
        negotiation_window: Duration,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<Self>, PeerError> {
        info!(peer_id = %peer_id, ?role, "creating peer session");

        let link = factory
            .create_link(&peer_id, role, local_stream.as_ref())
            .await?;
        // Subscribe before negotiation starts so the first offer is not lost.
        let link_events = link.events();

        let current_video = local_stream
            .as_ref()
            .and_then(|s| s.video_track())
            .map(|t| t.id().to_string());

        let session = Arc::new(Self {
            peer_id,
            role,
            link,
            state: RwLock::new(ConnectionState::Connecting),
            local_stream: RwLock::new(local_stream),
            remote_stream: RwLock::new(None),
            current_video: RwLock::new(current_video),
            deadline: std::sync::Mutex::new(None),
            watcher: std::sync::Mutex::new(None),
            created_at: Instant::now(),
            connected_at: RwLock::new(None),
        });

        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let deadline = Deadline::schedule(
            negotiation_window,
            timeout_tx,
            WatcherMsg::NegotiationTimeout,
        );
        session.store_deadline(deadline);

        let watcher = tokio::spawn(Self::watch(
            Arc::clone(&session),
            link_events,
            timeout_rx,
            events,
        ));
        if let Ok(mut guard) = session.watcher.lock() {
            *guard = Some(watcher);
        }

        if let Err(e) = session.link.begin_negotiation().await {
            warn!(peer_id = %session.peer_id, "negotiation start failed: {}", e);
            session.close().await;
            return Err(e);
        }

        Ok(session)
    }

    /// The remote participant this session talks to
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Negotiation role, fixed at creation
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Whether media is currently flowing (`Connected` or `Degraded`)
    pub async fn is_live(&self) -> bool {
        matches!(
            self.state().await,
            ConnectionState::Connected | ConnectionState::Degraded
        )
    }

    /// The local stream handed to this session, if still held
    pub async fn local_stream(&self) -> Option<MediaStreamHandle> {
        self.local_stream.read().await.clone()
    }

    /// The remote stream, if it arrived
    pub async fn remote_stream(&self) -> Option<MediaStreamHandle> {
        self.remote_stream.read().await.clone()
    }

    /// How long the session has been connected
    pub async fn connection_duration(&self) -> Option<Duration> {
        self.connected_at.read().await.map(|at| at.elapsed())
    }

    /// Forward an inbound signaling payload to the underlying link.
    ///
    /// Malformed payloads are dropped with a warning; they never tear the
    /// session down.
    pub async fn ingest_signal(&self, payload: serde_json::Value) {
        if self.state().await == ConnectionState::Closed {
            debug!(peer_id = %self.peer_id, "dropping signal for closed session");
            return;
        }

        if let Err(e) = self.link.ingest_signal(payload).await {
            warn!(peer_id = %self.peer_id, "dropping malformed signal payload: {}", e);
        }
    }

    /// Swap the outgoing video track on the live connection.
    ///
    /// Idempotent, and a no-op on sessions that carry no video.
    pub async fn replace_outgoing_video_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        if self.state().await == ConnectionState::Closed {
            return Ok(());
        }

        let current = self.current_video.read().await.clone();
        match current {
            None => Ok(()),
            Some(id) if id == track.id() => Ok(()),
            Some(_) => {
                self.link.replace_video_track(track.clone()).await?;
                *self.current_video.write().await = Some(track.id().to_string());
                debug!(peer_id = %self.peer_id, track_id = %track.id(), "outgoing video track replaced");
                Ok(())
            }
        }
    }

    /// Tear down the link and release all held stream references.
    ///
    /// Safe to call multiple times; the second call is a no-op. Streams are
    /// released even if the link errors during teardown.
    pub async fn close(&self) {
        if self.teardown().await {
            if let Ok(mut guard) = self.watcher.lock() {
                if let Some(handle) = guard.take() {
                    handle.abort();
                }
            }
        }
    }

    fn store_deadline(&self, deadline: Deadline) {
        if let Ok(mut guard) = self.deadline.lock() {
            *guard = Some(deadline);
        }
    }

    fn cancel_deadline(&self) {
        if let Ok(mut guard) = self.deadline.lock() {
            if let Some(deadline) = guard.take() {
                deadline.cancel();
            }
        }
    }

    /// Move to `Closed` and release resources. Returns false when already
    /// closed.
    async fn teardown(&self) -> bool {
        {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Closed {
                return false;
            }
            debug!(peer_id = %self.peer_id, from = ?*state, "peer session closing");
            *state = ConnectionState::Closed;
        }

        self.cancel_deadline();

        if let Err(e) = self.link.close().await {
            warn!(peer_id = %self.peer_id, "link teardown error: {}", e);
        }

        // Stream handles are released regardless of link teardown outcome.
        self.local_stream.write().await.take();
        if let Some(remote) = self.remote_stream.write().await.take() {
            remote.stop();
        }

        true
    }

    async fn mark_connected(&self) -> bool {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Connecting {
            return false;
        }
        *state = ConnectionState::Connected;
        drop(state);

        self.cancel_deadline();
        *self.connected_at.write().await = Some(Instant::now());
        info!(
            peer_id = %self.peer_id,
            elapsed_ms = self.created_at.elapsed().as_millis() as u64,
            "peer session connected"
        );
        true
    }

    async fn apply_quality(&self, report: QualityReport) -> Option<SessionEvent> {
        let mut state = self.state.write().await;
        match (*state, report.is_degraded()) {
            (ConnectionState::Connected, true) => {
                warn!(
                    peer_id = %self.peer_id,
                    packet_loss = report.packet_loss,
                    rtt_ms = report.rtt_ms,
                    "peer connection degraded"
                );
                *state = ConnectionState::Degraded;
                Some(SessionEvent::Degraded {
                    peer_id: self.peer_id.clone(),
                })
            }
            (ConnectionState::Degraded, false) => {
                info!(peer_id = %self.peer_id, "peer connection recovered");
                *state = ConnectionState::Connected;
                Some(SessionEvent::Recovered {
                    peer_id: self.peer_id.clone(),
                })
            }
            _ => None,
        }
    }

    async fn watch(
        session: Arc<Self>,
        mut link_events: broadcast::Receiver<LinkEvent>,
        mut timeout_rx: mpsc::UnboundedReceiver<WatcherMsg>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        let peer_id = session.peer_id.clone();
        let mut timeout_armed = true;

        loop {
            tokio::select! {
                msg = timeout_rx.recv(), if timeout_armed => {
                    timeout_armed = false;
                    if let Some(WatcherMsg::NegotiationTimeout) = msg {
                        if session.state().await == ConnectionState::Connecting {
                            warn!(peer_id = %peer_id, "peer negotiation timed out");
                            session.teardown().await;
                            let _ = events.send(SessionEvent::Failed {
                                peer_id: peer_id.clone(),
                                reason: PeerError::Timeout,
                            });
                            break;
                        }
                    }
                }
                ev = link_events.recv() => match ev {
                    Ok(LinkEvent::Signal(payload)) => {
                        let _ = events.send(SessionEvent::Signal {
                            peer_id: peer_id.clone(),
                            payload,
                        });
                    }
                    Ok(LinkEvent::StateChanged(LinkState::Connected)) => {
                        if session.mark_connected().await {
                            let _ = events.send(SessionEvent::Connected {
                                peer_id: peer_id.clone(),
                            });
                        }
                    }
                    Ok(LinkEvent::StateChanged(LinkState::Disconnected)) => {
                        if session.teardown().await {
                            let _ = events.send(SessionEvent::Closed {
                                peer_id: peer_id.clone(),
                            });
                        }
                        break;
                    }
                    Ok(LinkEvent::StateChanged(LinkState::Failed)) => {
                        if session.teardown().await {
                            let _ = events.send(SessionEvent::Failed {
                                peer_id: peer_id.clone(),
                                reason: PeerError::Negotiation("link failed".to_string()),
                            });
                        }
                        break;
                    }
                    Ok(LinkEvent::StateChanged(LinkState::Connecting)) => {}
                    Ok(LinkEvent::RemoteStream(stream)) => {
                        *session.remote_stream.write().await = Some(stream.clone());
                        let _ = events.send(SessionEvent::RemoteStream {
                            peer_id: peer_id.clone(),
                            stream,
                        });
                    }
                    Ok(LinkEvent::Quality(report)) => {
                        if let Some(event) = session.apply_quality(report).await {
                            let _ = events.send(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(peer_id = %peer_id, skipped, "link event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!(peer_id = %peer_id, "session watcher terminated");
    }
}
