//! Top-level call state machine
//!
//! One serialized event loop per controller: UI commands, signaling events,
//! session events, and timer expiries all funnel into the same task, so no
//! two transitions ever interleave. Long-running work (media acquisition,
//! teardown, screen switches) runs as spawned tasks that report back into
//! the loop, stamped with the generation they belong to; results arriving
//! after the call moved on are detected and their resources reclaimed.

use super::session::{CallSession, CallerInfo};
use crate::config::CallConfig;
use crate::error::{Error, MediaError, Result};
use crate::events::{CallEvent, CallKind, CallState, ParticipantId, TransportEvent};
use crate::media::{MediaController, MediaDevices, MediaStreamHandle};
use crate::peer::{PeerLinkFactory, PeerSession, Role, SessionEvent};
use crate::signaling::{
    CallRequestParams, RoomParams, SignalEvent, SignalKind, SignalRelayParams, SignalingTransport,
};
use crate::timer::{expire_after, Deadline, Expired};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Read-only view of the controller's state, for UI rendering and tests
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    /// Current lifecycle state
    pub state: CallState,
    /// Room of the current call, if any
    pub room_id: Option<String>,
    /// Kind of the current call, if any
    pub kind: Option<CallKind>,
    /// Caller identity for incoming calls
    pub caller: Option<ParticipantId>,
    /// Participants with a live session
    pub participants: Vec<ParticipantId>,
    /// Seconds spent in the active stage
    pub duration_secs: u64,
}

enum Command {
    PlaceCall {
        room_id: String,
        kind: CallKind,
        reply: oneshot::Sender<Result<()>>,
    },
    AcceptCall {
        reply: oneshot::Sender<Result<()>>,
    },
    RejectCall {
        reply: oneshot::Sender<Result<()>>,
    },
    EndCall {
        reply: oneshot::Sender<Result<()>>,
    },
    ToggleAudio {
        reply: oneshot::Sender<bool>,
    },
    ToggleVideo {
        reply: oneshot::Sender<bool>,
    },
    StartScreenShare {
        reply: oneshot::Sender<Result<()>>,
    },
    StopScreenShare {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<CallSnapshot>,
    },
    Shutdown,
}

#[derive(Debug)]
enum MediaPurpose {
    Place { room_id: String, kind: CallKind },
    Accept,
}

enum InternalEvent {
    Signaling(SignalEvent),
    Transport(TransportEvent),
    MediaReady {
        generation: u64,
        purpose: MediaPurpose,
        result: std::result::Result<MediaStreamHandle, MediaError>,
    },
    CleanupDone {
        generation: u64,
    },
    CleanupTimedOut {
        generation: u64,
    },
    DurationTick {
        generation: u64,
    },
    ScreenShareStarted {
        generation: u64,
        stream: MediaStreamHandle,
    },
    ScreenShareStopped {
        generation: u64,
    },
    ScreenEnded {
        generation: u64,
    },
}

/// Builder for the call orchestration loop.
///
/// Owns nothing at rest; [`start`](Self::start) wires the transport
/// subscriptions, spawns the loop, and hands back a cloneable
/// [`CallHandle`].
pub struct CallController {
    config: CallConfig,
    local_id: ParticipantId,
    transport: Arc<SignalingTransport>,
    devices: Arc<dyn MediaDevices>,
    links: Arc<dyn PeerLinkFactory>,
}

impl CallController {
    /// Create a controller over the supplied capabilities.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when the configuration fails
    /// validation.
    pub fn new(
        config: CallConfig,
        local_id: ParticipantId,
        transport: Arc<SignalingTransport>,
        devices: Arc<dyn MediaDevices>,
        links: Arc<dyn PeerLinkFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            local_id,
            transport,
            devices,
            links,
        })
    }

    /// Spawn the orchestration loop and return its handle.
    pub async fn start(self) -> CallHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);

        // Route every call-relevant signaling kind into the loop.
        for kind in [
            SignalKind::IncomingCall,
            SignalKind::CallAccepted,
            SignalKind::CallRejected,
            SignalKind::CallEnded,
            SignalKind::Signal,
            SignalKind::PeerDisconnected,
        ] {
            let tx = internal_tx.clone();
            self.transport
                .subscribe(kind, move |event| {
                    let _ = tx.send(InternalEvent::Signaling(event));
                })
                .await;
        }

        // Transport health feeds the same loop.
        let mut notifications = self.transport.notifications();
        let notify_tx = internal_tx.clone();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(event) => {
                        if notify_tx.send(InternalEvent::Transport(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let media = Arc::new(MediaController::new(
            Arc::clone(&self.devices),
            self.config.media.clone(),
        ));

        let orchestrator = Orchestrator {
            config: self.config,
            local_id: self.local_id,
            transport: self.transport,
            media,
            links: self.links,
            events: events.clone(),
            internal_tx,
            session_tx,
            state: CallState::Idle,
            call: None,
            generation: 0,
            pending_place: None,
            pending_accept: None,
            cleanup_deadline: None,
            duration_task: None,
            duration_secs: 0,
            screen_watch: None,
        };

        tokio::spawn(orchestrator.run(cmd_rx, internal_rx, session_rx));

        CallHandle { cmd_tx, events }
    }
}

/// Cloneable handle to a running call controller.
#[derive(Clone)]
pub struct CallHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<CallEvent>,
}

impl CallHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| Error::ControllerStopped)?;
        rx.await.map_err(|_| Error::ControllerStopped)
    }

    /// Place a call into a room. Resolves once local media is up and the
    /// call is ringing, or with the acquisition error.
    pub async fn place_call(&self, room_id: impl Into<String>, kind: CallKind) -> Result<()> {
        let room_id = room_id.into();
        self.request(|reply| Command::PlaceCall {
            room_id,
            kind,
            reply,
        })
        .await?
    }

    /// Accept the ringing incoming call. Resolves once the call is active.
    pub async fn accept_call(&self) -> Result<()> {
        self.request(|reply| Command::AcceptCall { reply }).await?
    }

    /// Reject the ringing incoming call, or cancel a placed one.
    pub async fn reject_call(&self) -> Result<()> {
        self.request(|reply| Command::RejectCall { reply }).await?
    }

    /// Hang up. Resolves as soon as teardown is underway; watch for
    /// [`CallEvent::StateChanged`] to observe completion.
    pub async fn end_call(&self) -> Result<()> {
        self.request(|reply| Command::EndCall { reply }).await?
    }

    /// Flip the local audio track; returns the new enabled state
    pub async fn toggle_audio(&self) -> Result<bool> {
        self.request(|reply| Command::ToggleAudio { reply }).await
    }

    /// Flip the local video track; returns the new enabled state
    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(|reply| Command::ToggleVideo { reply }).await
    }

    /// Start sharing a screen or window during an active call
    pub async fn start_screen_share(&self) -> Result<()> {
        self.request(|reply| Command::StartScreenShare { reply })
            .await?
    }

    /// Stop sharing and restore the camera
    pub async fn stop_screen_share(&self) -> Result<()> {
        self.request(|reply| Command::StopScreenShare { reply })
            .await?
    }

    /// Snapshot of the current call state
    pub async fn snapshot(&self) -> Result<CallSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Current lifecycle state
    pub async fn state(&self) -> Result<CallState> {
        Ok(self.snapshot().await?.state)
    }

    /// Subscribe to controller events
    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Stop the controller loop. Any live call is torn down best-effort.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

struct Orchestrator {
    config: CallConfig,
    local_id: ParticipantId,
    transport: Arc<SignalingTransport>,
    media: Arc<MediaController>,
    links: Arc<dyn PeerLinkFactory>,
    events: broadcast::Sender<CallEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    state: CallState,
    call: Option<CallSession>,
    /// Bumped on every state transition; async completions carry the
    /// generation they were spawned under and are dropped when it no longer
    /// matches.
    generation: u64,
    pending_place: Option<oneshot::Sender<Result<()>>>,
    pending_accept: Option<oneshot::Sender<Result<()>>>,
    cleanup_deadline: Option<Deadline>,
    duration_task: Option<JoinHandle<()>>,
    duration_secs: u64,
    screen_watch: Option<JoinHandle<()>>,
}

impl Orchestrator {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        info!(local_id = %self.local_id, "call controller started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(event) = internal_rx.recv() => self.handle_internal(event).await,
                Some(event) = session_rx.recv() => self.handle_session_event(event).await,
            }
        }

        // Final best-effort teardown, awaited so nothing leaks past shutdown.
        self.cancel_timers();
        if let Some(call) = self.call.take() {
            for session in call.sessions() {
                session.close().await;
            }
        }
        self.media.release_all().await;
        info!(local_id = %self.local_id, "call controller stopped");
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: CallState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "call state transition");
        self.state = state;
        self.generation += 1;
        self.emit(CallEvent::StateChanged(state));
    }

    fn cancel_timers(&mut self) {
        if let Some(task) = self.duration_task.take() {
            task.abort();
        }
        self.duration_secs = 0;
        if let Some(task) = self.screen_watch.take() {
            task.abort();
        }
        if let Some(deadline) = self.cleanup_deadline.take() {
            deadline.cancel();
        }
    }

    fn cancel_pending(&mut self, reason: &str) {
        if let Some(reply) = self.pending_place.take() {
            let _ = reply.send(Err(Error::Cancelled(reason.to_string())));
        }
        if let Some(reply) = self.pending_accept.take() {
            let _ = reply.send(Err(Error::Cancelled(reason.to_string())));
        }
    }

    /// Immediate reset for calls that never went active (reject, remote
    /// cancel, fatal failure). Cleanup runs detached; nothing waits on it.
    fn reset_to_idle(&mut self, reason: &str) {
        self.cancel_timers();
        self.cancel_pending(reason);
        let call = self.call.take();

        let media = Arc::clone(&self.media);
        tokio::spawn(async move {
            media.release_all().await;
            if let Some(call) = call {
                for session in call.sessions() {
                    session.close().await;
                }
            }
        });

        if self.state != CallState::Idle {
            self.set_state(CallState::Idle);
        } else {
            self.generation += 1;
        }
    }

    /// Orderly teardown of a placed or active call: enter `Ending`, run
    /// cleanup as a task, force `Idle` if it overruns its window.
    fn begin_teardown(&mut self, notify_server: bool) {
        self.cancel_timers();
        self.cancel_pending("call ended");
        let call = self.call.take();
        self.set_state(CallState::Ending);

        let generation = self.generation;
        self.cleanup_deadline = Some(Deadline::schedule(
            self.config.timeouts.cleanup(),
            self.internal_tx.clone(),
            InternalEvent::CleanupTimedOut { generation },
        ));

        let media = Arc::clone(&self.media);
        let transport = Arc::clone(&self.transport);
        let local_id = self.local_id.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            media.release_all().await;
            if let Some(call) = call {
                for session in call.sessions() {
                    session.close().await;
                }
                if notify_server {
                    let event = SignalEvent::CallEnded(RoomParams {
                        room_id: call.room_id().to_string(),
                        from_id: local_id,
                    });
                    if let Err(e) = transport.send(event).await {
                        debug!("call end notification not sent: {}", e);
                    }
                }
            }
            let _ = tx.send(InternalEvent::CleanupDone { generation });
        });
    }

    fn enter_active(&mut self) {
        if let Some(call) = &mut self.call {
            call.mark_started();
        }
        self.set_state(CallState::Active);
        self.duration_secs = 0;

        let generation = self.generation;
        let tx = self.internal_tx.clone();
        self.duration_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + std::time::Duration::from_secs(1),
                std::time::Duration::from_secs(1),
            );
            loop {
                interval.tick().await;
                if tx.send(InternalEvent::DurationTick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    async fn create_session(&mut self, peer_id: ParticipantId, role: Role) {
        let local_stream = self.media.local_stream().await;
        match PeerSession::connect(
            peer_id.clone(),
            role,
            &self.links,
            local_stream,
            self.config.timeouts.peer_connect(),
            self.session_tx.clone(),
        )
        .await
        {
            Ok(session) => {
                if let Some(call) = &mut self.call {
                    if let Some(replaced) = call.insert_session(session) {
                        debug!(peer_id = %peer_id, "replacing duplicate peer session");
                        replaced.close().await;
                    }
                } else {
                    // No call anymore; don't leak the session.
                    session.close().await;
                }
            }
            Err(e) => {
                warn!(peer_id = %peer_id, "peer session creation failed: {}", e);
                self.emit(CallEvent::PeerError { peer_id, reason: e });
            }
        }
    }

    /// Remove one participant; ends the call when nobody remains.
    async fn drop_participant(&mut self, peer_id: &str, event: Option<CallEvent>) {
        let Some(call) = &mut self.call else {
            return;
        };
        let Some(session) = call.remove_session(peer_id) else {
            return;
        };
        let now_empty = call.is_empty();
        session.close().await;

        if let Some(event) = event {
            self.emit(event);
        }

        if self.state == CallState::Active && now_empty {
            info!("last participant left, ending call");
            self.begin_teardown(true);
        }
    }

    fn spawn_media_acquisition(&self, purpose: MediaPurpose, kind: CallKind) {
        let generation = self.generation;
        let media = Arc::clone(&self.media);
        let window = self.config.timeouts.accept_media();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match expire_after(window, media.acquire_camera(kind)).await {
                Ok(result) => result,
                Err(Expired) => Err(MediaError::Timeout),
            };
            let _ = tx.send(InternalEvent::MediaReady {
                generation,
                purpose,
                result,
            });
        });
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::PlaceCall {
                room_id,
                kind,
                reply,
            } => {
                if self.state != CallState::Idle || self.pending_place.is_some() {
                    let _ = reply.send(Err(Error::InvalidState(format!(
                        "cannot place a call while {:?}",
                        self.state
                    ))));
                    return;
                }
                info!(room_id = %room_id, ?kind, "placing call");
                self.pending_place = Some(reply);
                self.spawn_media_acquisition(MediaPurpose::Place { room_id, kind }, kind);
            }

            Command::AcceptCall { reply } => {
                if self.state != CallState::Incoming {
                    let _ = reply.send(Err(Error::InvalidState(format!(
                        "no incoming call to accept while {:?}",
                        self.state
                    ))));
                    return;
                }
                if self.pending_accept.is_some() {
                    // Already accepting; the duplicate is a no-op.
                    debug!("duplicate accept ignored");
                    let _ = reply.send(Ok(()));
                    return;
                }
                let kind = self.call.as_ref().map(|c| c.kind()).unwrap_or(CallKind::Audio);
                info!(?kind, "accepting call");
                self.pending_accept = Some(reply);
                self.spawn_media_acquisition(MediaPurpose::Accept, kind);
            }

            Command::RejectCall { reply } => match self.state {
                CallState::Incoming => {
                    self.send_room_event(SignalEvent::CallRejected).await;
                    info!("call rejected");
                    self.reset_to_idle("call rejected");
                    let _ = reply.send(Ok(()));
                }
                CallState::Outgoing => {
                    self.send_room_event(SignalEvent::CallEnded).await;
                    info!("outgoing call cancelled");
                    self.reset_to_idle("call cancelled");
                    let _ = reply.send(Ok(()));
                }
                _ => {
                    let _ = reply.send(Err(Error::InvalidState(format!(
                        "nothing to reject while {:?}",
                        self.state
                    ))));
                }
            },

            Command::EndCall { reply } => match self.state {
                CallState::Idle | CallState::Ending => {
                    let _ = reply.send(Ok(()));
                }
                CallState::Incoming => {
                    self.send_room_event(SignalEvent::CallRejected).await;
                    self.reset_to_idle("call ended");
                    let _ = reply.send(Ok(()));
                }
                CallState::Outgoing | CallState::Active => {
                    info!("ending call");
                    self.begin_teardown(true);
                    let _ = reply.send(Ok(()));
                }
            },

            Command::ToggleAudio { reply } => {
                let _ = reply.send(self.media.toggle_audio().await);
            }

            Command::ToggleVideo { reply } => {
                let _ = reply.send(self.media.toggle_video().await);
            }

            Command::StartScreenShare { reply } => {
                if self.state != CallState::Active {
                    let _ = reply.send(Err(Error::InvalidState(format!(
                        "screen share requires an active call, not {:?}",
                        self.state
                    ))));
                    return;
                }
                let sessions = self.call.as_ref().map(|c| c.sessions()).unwrap_or_default();
                let generation = self.generation;
                let media = Arc::clone(&self.media);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    match media.start_screen_share(&sessions).await {
                        Ok(stream) => {
                            let _ = tx.send(InternalEvent::ScreenShareStarted {
                                generation,
                                stream,
                            });
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = reply.send(Err(Error::Media(e)));
                        }
                    }
                });
            }

            Command::StopScreenShare { reply } => {
                let sessions = self.call.as_ref().map(|c| c.sessions()).unwrap_or_default();
                let generation = self.generation;
                let media = Arc::clone(&self.media);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    match media.stop_screen_share(&sessions).await {
                        Ok(()) => {
                            let _ = tx.send(InternalEvent::ScreenShareStopped { generation });
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = reply.send(Err(Error::Media(e)));
                        }
                    }
                });
            }

            Command::Snapshot { reply } => {
                let _ = reply.send(CallSnapshot {
                    state: self.state,
                    room_id: self.call.as_ref().map(|c| c.room_id().to_string()),
                    kind: self.call.as_ref().map(|c| c.kind()),
                    caller: self
                        .call
                        .as_ref()
                        .and_then(|c| c.caller())
                        .map(|caller| caller.id.clone()),
                    participants: self
                        .call
                        .as_ref()
                        .map(|c| c.participant_ids())
                        .unwrap_or_default(),
                    duration_secs: self.duration_secs,
                });
            }

            Command::Shutdown => unreachable!("handled by the loop"),
        }
    }

    /// Send an accept/reject/end style event for the current room
    async fn send_room_event(&self, build: fn(RoomParams) -> SignalEvent) {
        let Some(call) = &self.call else {
            return;
        };
        let event = build(RoomParams {
            room_id: call.room_id().to_string(),
            from_id: self.local_id.clone(),
        });
        if let Err(e) = self.transport.send(event).await {
            warn!("room event not sent: {}", e);
        }
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Signaling(event) => self.handle_signaling(event).await,

            InternalEvent::Transport(TransportEvent::ReconnectExhausted) => {
                warn!("signaling transport gone, resetting call");
                self.reset_to_idle("signaling transport lost");
            }
            InternalEvent::Transport(event) => {
                debug!(?event, "transport notification");
            }

            InternalEvent::MediaReady {
                generation,
                purpose,
                result,
            } => self.handle_media_ready(generation, purpose, result).await,

            InternalEvent::CleanupDone { generation } => {
                if generation == self.generation && self.state == CallState::Ending {
                    if let Some(deadline) = self.cleanup_deadline.take() {
                        deadline.cancel();
                    }
                    info!("call teardown complete");
                    self.set_state(CallState::Idle);
                }
            }

            InternalEvent::CleanupTimedOut { generation } => {
                if generation == self.generation && self.state == CallState::Ending {
                    warn!("call teardown overran its window, forcing idle");
                    self.set_state(CallState::Idle);
                }
            }

            InternalEvent::DurationTick { generation } => {
                if generation == self.generation && self.state == CallState::Active {
                    self.duration_secs += 1;
                    self.emit(CallEvent::DurationTick(self.duration_secs));
                }
            }

            InternalEvent::ScreenShareStarted { generation, stream } => {
                if generation == self.generation && self.state == CallState::Active {
                    let mut watch = stream.ended_watch();
                    let tx = self.internal_tx.clone();
                    self.screen_watch = Some(tokio::spawn(async move {
                        loop {
                            if watch.changed().await.is_err() {
                                break;
                            }
                            if *watch.borrow() {
                                let _ = tx.send(InternalEvent::ScreenEnded { generation });
                                break;
                            }
                        }
                    }));
                } else {
                    // The call moved on while the share was starting.
                    debug!("discarding stale screen share");
                    let media = Arc::clone(&self.media);
                    tokio::spawn(async move {
                        media.discard_screen(&stream).await;
                    });
                }
            }

            InternalEvent::ScreenShareStopped { generation } => {
                if generation == self.generation {
                    if let Some(task) = self.screen_watch.take() {
                        task.abort();
                    }
                }
            }

            InternalEvent::ScreenEnded { generation } => {
                if generation == self.generation && self.state == CallState::Active {
                    info!("screen share ended outside the application");
                    self.emit(CallEvent::ScreenShareEnded);
                    if let Some(task) = self.screen_watch.take() {
                        task.abort();
                    }
                    // Same restore path as an in-app stop.
                    let sessions =
                        self.call.as_ref().map(|c| c.sessions()).unwrap_or_default();
                    let media = Arc::clone(&self.media);
                    tokio::spawn(async move {
                        if let Err(e) = media.stop_screen_share(&sessions).await {
                            warn!("screen share cleanup failed: {}", e);
                        }
                    });
                }
            }
        }
    }

    async fn handle_media_ready(
        &mut self,
        generation: u64,
        purpose: MediaPurpose,
        result: std::result::Result<MediaStreamHandle, MediaError>,
    ) {
        if generation != self.generation {
            // The call moved on before acquisition settled; reclaim the
            // stream so nothing stays lit.
            if let Ok(stream) = result {
                debug!("releasing media acquired for a cancelled operation");
                stream.stop();
            }
            return;
        }

        match purpose {
            MediaPurpose::Place { room_id, kind } => {
                let Some(reply) = self.pending_place.take() else {
                    return;
                };
                match result {
                    Ok(stream) => {
                        self.media.install_capture(&stream).await;
                        self.call = Some(CallSession::outgoing(room_id.clone(), kind));
                        self.emit(CallEvent::LocalStream(stream));
                        self.set_state(CallState::Outgoing);

                        let request = SignalEvent::CallRequest(CallRequestParams {
                            room_id,
                            from_id: self.local_id.clone(),
                            kind,
                        });
                        if let Err(e) = self.transport.send(request).await {
                            warn!("call request not sent: {}", e);
                            self.reset_to_idle("signaling unavailable");
                            let _ = reply.send(Err(Error::Connect(e)));
                            return;
                        }
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        // Stay idle; the failure is surfaced once to the caller.
                        warn!("local media acquisition failed: {}", e);
                        let _ = reply.send(Err(Error::Media(e)));
                    }
                }
            }

            MediaPurpose::Accept => {
                let Some(reply) = self.pending_accept.take() else {
                    return;
                };
                match result {
                    Ok(stream) => {
                        self.media.install_capture(&stream).await;
                        self.emit(CallEvent::LocalStream(stream.clone()));
                        self.enter_active();

                        let roster = self
                            .call
                            .as_ref()
                            .map(|c| c.accept_roster(&self.local_id))
                            .unwrap_or_default();
                        for peer_id in roster {
                            self.create_session(peer_id, Role::Responder).await;
                        }

                        self.send_room_event(SignalEvent::CallAccepted).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        // Auto-reject: the remote side should stop ringing.
                        warn!("accept aborted, local media unavailable: {}", e);
                        self.send_room_event(SignalEvent::CallRejected).await;
                        self.reset_to_idle("media unavailable");
                        let _ = reply.send(Err(Error::Media(e)));
                    }
                }
            }
        }
    }

    async fn handle_signaling(&mut self, event: SignalEvent) {
        match event {
            SignalEvent::IncomingCall(params) => {
                if self.state != CallState::Idle
                    || self.pending_place.is_some()
                    || self.call.is_some()
                {
                    debug!(
                        room_id = %params.room_id,
                        "ignoring incoming call while busy"
                    );
                    return;
                }
                info!(
                    room_id = %params.room_id,
                    caller = %params.caller_id,
                    kind = ?params.kind,
                    "incoming call"
                );
                self.call = Some(CallSession::incoming(
                    params.room_id,
                    params.kind,
                    CallerInfo {
                        id: params.caller_id,
                        name: params.caller_name,
                    },
                    params.participants,
                ));
                self.set_state(CallState::Incoming);
            }

            SignalEvent::CallAccepted(params) => {
                if !self.is_current_room(&params.room_id) {
                    return;
                }
                match self.state {
                    CallState::Outgoing => {
                        info!(peer_id = %params.from_id, "call accepted by remote");
                        self.enter_active();
                        self.create_session(params.from_id, Role::Initiator).await;
                    }
                    CallState::Active => {
                        // Another participant joined the running call.
                        info!(peer_id = %params.from_id, "participant joined");
                        self.create_session(params.from_id, Role::Initiator).await;
                    }
                    _ => debug!("ignoring accept in state {:?}", self.state),
                }
            }

            SignalEvent::CallRejected(params) => {
                if !self.is_current_room(&params.room_id) {
                    return;
                }
                if self.state == CallState::Outgoing {
                    info!(peer_id = %params.from_id, "call rejected by remote");
                    self.reset_to_idle("call rejected by remote");
                }
            }

            SignalEvent::CallEnded(params) => {
                if !self.is_current_room(&params.room_id) {
                    return;
                }
                match self.state {
                    CallState::Incoming => {
                        // Caller hung up before we answered; a pending accept
                        // is cancelled and its late media release handled by
                        // the generation check.
                        info!("incoming call cancelled by caller");
                        self.reset_to_idle("call cancelled by caller");
                    }
                    CallState::Outgoing => {
                        info!("outgoing call ended by remote");
                        self.begin_teardown(false);
                    }
                    CallState::Active => {
                        self.drop_participant(
                            &params.from_id.clone(),
                            Some(CallEvent::PeerDisconnected {
                                peer_id: params.from_id,
                            }),
                        )
                        .await;
                    }
                    _ => {}
                }
            }

            SignalEvent::Signal(params) => {
                if params.to_id != self.local_id {
                    debug!("dropping relay addressed to {}", params.to_id);
                    return;
                }
                let Some(call) = &self.call else {
                    debug!("dropping relay without a call");
                    return;
                };
                // Per-peer ordering holds because this loop is the only
                // consumer of transport events.
                match call.session(&params.from_id) {
                    Some(session) => {
                        let session = Arc::clone(session);
                        session.ingest_signal(params.payload).await;
                    }
                    None => {
                        debug!(peer_id = %params.from_id, "dropping relay for unknown peer");
                    }
                }
            }

            SignalEvent::PeerDisconnected(params) => {
                if !self.is_current_room(&params.room_id) {
                    return;
                }
                info!(peer_id = %params.peer_id, "peer disconnected");
                self.drop_participant(
                    &params.peer_id.clone(),
                    Some(CallEvent::PeerDisconnected {
                        peer_id: params.peer_id,
                    }),
                )
                .await;
            }

            SignalEvent::CallRequest(_) | SignalEvent::Presence(_) => {
                // Not routed through the controller.
            }
        }
    }

    fn is_current_room(&self, room_id: &str) -> bool {
        self.call
            .as_ref()
            .map(|c| c.room_id() == room_id)
            .unwrap_or(false)
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Signal { peer_id, payload } => {
                let Some(call) = &self.call else {
                    return;
                };
                let relay = SignalEvent::Signal(SignalRelayParams {
                    room_id: call.room_id().to_string(),
                    to_id: peer_id.clone(),
                    from_id: self.local_id.clone(),
                    payload,
                });
                if let Err(e) = self.transport.send(relay).await {
                    warn!(peer_id = %peer_id, "signal relay not sent: {}", e);
                }
            }

            SessionEvent::Connected { peer_id } => {
                info!(peer_id = %peer_id, "peer media flowing");
            }

            SessionEvent::Degraded { peer_id } => {
                debug!(peer_id = %peer_id, "peer quality degraded");
            }

            SessionEvent::Recovered { peer_id } => {
                debug!(peer_id = %peer_id, "peer quality recovered");
            }

            SessionEvent::RemoteStream { peer_id, stream } => {
                self.emit(CallEvent::RemoteStream { peer_id, stream });
            }

            SessionEvent::Failed { peer_id, reason } => {
                warn!(peer_id = %peer_id, "peer session failed: {}", reason);
                self.drop_participant(
                    &peer_id.clone(),
                    Some(CallEvent::PeerError { peer_id, reason }),
                )
                .await;
            }

            SessionEvent::Closed { peer_id } => {
                self.drop_participant(
                    &peer_id.clone(),
                    Some(CallEvent::PeerDisconnected { peer_id }),
                )
                .await;
            }
        }
    }
}
