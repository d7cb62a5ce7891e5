//! Shared test doubles for the call orchestration integration tests
//!
//! Everything here is in-memory and deterministic: a scriptable signaling
//! endpoint, capture devices, and peer links the tests can drive directly.

#![allow(dead_code)]

use async_trait::async_trait;
use roomlink::{
    CallConfig, CallController, CallEvent, CallHandle, CallState, ConnectError, LinkEvent,
    LinkState, MediaConstraints, MediaDevices, MediaError, MediaStreamHandle, MediaTrack,
    PeerError, PeerLink, PeerLinkFactory, ReconnectPolicy, Role, SignalingChannel,
    SignalingConnector, SignalingTransport, StreamSource, TrackKind,
};
use roomlink::signaling::{AckParams, ClientFrame, ServerFrame, SignalEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,roomlink=debug")
        .try_init();
}

// ============================================================================
// Signaling double
// ============================================================================

/// In-memory signaling endpoint: acks hellos, records every event the client
/// sends, and lets the test inject server-pushed events.
pub struct MockSignaling {
    server_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    sent: Arc<Mutex<Vec<SignalEvent>>>,
    fail_dials: AtomicU32,
    dial_count: AtomicU32,
}

impl MockSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            server_tx: Mutex::new(None),
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_dials: AtomicU32::new(0),
            dial_count: AtomicU32::new(0),
        })
    }

    /// Inject a server-pushed event
    pub fn push(&self, event: SignalEvent) {
        let frame = ServerFrame::Event(event).to_json().unwrap();
        let guard = self.server_tx.lock().unwrap();
        guard
            .as_ref()
            .expect("no live connection")
            .send(frame)
            .unwrap();
    }

    /// Everything the client sent so far
    pub fn sent_events(&self) -> Vec<SignalEvent> {
        self.sent.lock().unwrap().clone()
    }

    /// Whether the client sent an event matching the predicate
    pub fn saw(&self, pred: impl Fn(&SignalEvent) -> bool) -> bool {
        self.sent.lock().unwrap().iter().any(pred)
    }

    /// Drop the live connection, simulating a transport failure
    pub fn drop_connection(&self) {
        self.server_tx.lock().unwrap().take();
    }

    /// Make the next `n` dials fail
    pub fn fail_next_dials(&self, n: u32) {
        self.fail_dials.store(n, Ordering::SeqCst);
    }

    pub fn dials(&self) -> u32 {
        self.dial_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingConnector for MockSignaling {
    fn mode(&self) -> &str {
        "mock"
    }

    async fn dial(&self) -> Result<SignalingChannel, ConnectError> {
        self.dial_count.fetch_add(1, Ordering::SeqCst);

        let failures = self.fail_dials.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_dials.store(failures - 1, Ordering::SeqCst);
            return Err(ConnectError::Unreachable("scripted failure".to_string()));
        }

        let (client_tx, mut server_rx) = mpsc::unbounded_channel::<String>();
        let (server_tx, client_rx) = mpsc::unbounded_channel::<String>();

        *self.server_tx.lock().unwrap() = Some(server_tx.clone());

        let sent = Arc::clone(&self.sent);
        tokio::spawn(async move {
            // The responder clone is released after the ack so the stored
            // sender is the only thing keeping the connection alive.
            let mut responder = Some(server_tx);
            while let Some(frame) = server_rx.recv().await {
                match ClientFrame::from_json(&frame) {
                    Ok(ClientFrame::Hello(hello)) => {
                        if let Some(tx) = responder.take() {
                            let ack = ServerFrame::Ack(AckParams {
                                connection_id: hello.connection_id,
                            });
                            let _ = tx.send(ack.to_json().unwrap());
                        }
                    }
                    Ok(ClientFrame::Event(event)) => {
                        sent.lock().unwrap().push(event);
                    }
                    Ok(ClientFrame::Bye(_)) => break,
                    Err(_) => {}
                }
            }
        });

        Ok(SignalingChannel {
            tx: client_tx,
            rx: client_rx,
        })
    }
}

// ============================================================================
// Device double
// ============================================================================

/// Capture devices with scriptable latency and failures
pub struct MockDevices {
    capture_delay: Mutex<Duration>,
    fail_capture: AtomicBool,
    captures: Mutex<Vec<MediaStreamHandle>>,
    screens: Mutex<Vec<MediaStreamHandle>>,
}

impl MockDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            capture_delay: Mutex::new(Duration::ZERO),
            fail_capture: AtomicBool::new(false),
            captures: Mutex::new(Vec::new()),
            screens: Mutex::new(Vec::new()),
        })
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_capture(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }

    /// Every capture stream handed out, in order
    pub fn captures(&self) -> Vec<MediaStreamHandle> {
        self.captures.lock().unwrap().clone()
    }

    /// Every screen stream handed out, in order
    pub fn screens(&self) -> Vec<MediaStreamHandle> {
        self.screens.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn acquire_capture(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStreamHandle, MediaError> {
        let delay = *self.capture_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(MediaError::Denied);
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video));
        }
        let stream = MediaStreamHandle::new(StreamSource::Capture, tracks);
        self.captures.lock().unwrap().push(stream.clone());
        Ok(stream)
    }

    async fn acquire_display(&self) -> Result<MediaStreamHandle, MediaError> {
        let stream = MediaStreamHandle::new(
            StreamSource::Screen,
            vec![MediaTrack::new(TrackKind::Video)],
        );
        self.screens.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

// ============================================================================
// Peer link double
// ============================================================================

/// One recorded track replacement, with whether the track it displaced was
/// already stopped at that moment. A gap-free switch never stops the old
/// track first.
#[derive(Debug, Clone)]
pub struct ReplaceRecord {
    pub peer_id: String,
    pub new_track_id: String,
    pub previous_was_stopped: bool,
}

pub struct MockLink {
    pub peer_id: String,
    pub role: Role,
    tx: broadcast::Sender<LinkEvent>,
    pub closed: AtomicBool,
    ingested: Mutex<Vec<serde_json::Value>>,
    current_video: Mutex<Option<MediaTrack>>,
    replace_log: Arc<Mutex<Vec<ReplaceRecord>>>,
}

impl MockLink {
    pub fn emit(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit_connected(&self) {
        self.emit(LinkEvent::StateChanged(LinkState::Connected));
    }

    pub fn ingested(&self) -> Vec<serde_json::Value> {
        self.ingested.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerLink for MockLink {
    fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    async fn begin_negotiation(&self) -> Result<(), PeerError> {
        Ok(())
    }

    async fn ingest_signal(&self, payload: serde_json::Value) -> Result<(), PeerError> {
        if payload.get("malformed").is_some() {
            return Err(PeerError::Negotiation("malformed".to_string()));
        }
        self.ingested.lock().unwrap().push(payload);
        Ok(())
    }

    async fn replace_video_track(&self, track: MediaTrack) -> Result<(), PeerError> {
        let mut current = self.current_video.lock().unwrap();
        let previous_was_stopped = current.as_ref().map(|t| t.is_stopped()).unwrap_or(false);
        self.replace_log.lock().unwrap().push(ReplaceRecord {
            peer_id: self.peer_id.clone(),
            new_track_id: track.id().to_string(),
            previous_was_stopped,
        });
        *current = Some(track);
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockLinkFactory {
    auto_connect: bool,
    links: Mutex<HashMap<String, Arc<MockLink>>>,
    create_count: AtomicU32,
    replace_log: Arc<Mutex<Vec<ReplaceRecord>>>,
}

impl MockLinkFactory {
    pub fn new(auto_connect: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_connect,
            links: Mutex::new(HashMap::new()),
            create_count: AtomicU32::new(0),
            replace_log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The link created for a peer, if any
    pub fn link(&self, peer_id: &str) -> Option<Arc<MockLink>> {
        self.links.lock().unwrap().get(peer_id).cloned()
    }

    pub fn create_count(&self) -> u32 {
        self.create_count.load(Ordering::SeqCst)
    }

    /// Global, cross-peer record of every video track replacement
    pub fn replace_log(&self) -> Vec<ReplaceRecord> {
        self.replace_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerLinkFactory for MockLinkFactory {
    async fn create_link(
        &self,
        peer_id: &str,
        role: Role,
        local_stream: Option<&MediaStreamHandle>,
    ) -> Result<Arc<dyn PeerLink>, PeerError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);

        let (tx, _) = broadcast::channel(64);
        let link = Arc::new(MockLink {
            peer_id: peer_id.to_string(),
            role,
            tx,
            closed: AtomicBool::new(false),
            ingested: Mutex::new(Vec::new()),
            current_video: Mutex::new(local_stream.and_then(|s| s.video_track())),
            replace_log: Arc::clone(&self.replace_log),
        });

        self.links
            .lock()
            .unwrap()
            .insert(peer_id.to_string(), Arc::clone(&link));

        if self.auto_connect {
            let connecting = Arc::clone(&link);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                connecting.emit_connected();
            });
        }

        Ok(link as Arc<dyn PeerLink>)
    }
}

// ============================================================================
// Assembled harness
// ============================================================================

pub const LOCAL_ID: &str = "me";

pub struct Harness {
    pub handle: CallHandle,
    pub events: broadcast::Receiver<CallEvent>,
    pub signaling: Arc<MockSignaling>,
    pub devices: Arc<MockDevices>,
    pub links: Arc<MockLinkFactory>,
    pub transport: Arc<SignalingTransport>,
}

impl Harness {
    /// Full stack over mocks, transport connected, controller running
    pub async fn start() -> Self {
        Self::start_with(MockDevices::new(), MockLinkFactory::new(true)).await
    }

    pub async fn start_with(devices: Arc<MockDevices>, links: Arc<MockLinkFactory>) -> Self {
        init_logging();

        let signaling = MockSignaling::new();
        let transport = Arc::new(SignalingTransport::new(
            signaling.clone(),
            None,
            ReconnectPolicy::default(),
            Duration::from_secs(20),
        ));
        transport
            .connect(LOCAL_ID.to_string())
            .await
            .expect("transport connect");

        let controller = CallController::new(
            CallConfig::default(),
            LOCAL_ID.to_string(),
            Arc::clone(&transport),
            devices.clone(),
            links.clone(),
        )
        .expect("valid config");
        let handle = controller.start().await;
        let events = handle.events();

        Self {
            handle,
            events,
            signaling,
            devices,
            links,
            transport,
        }
    }

    /// Wait until the controller reports the wanted state
    pub async fn wait_for_state(&mut self, want: CallState) {
        let deadline = Duration::from_secs(60);
        tokio::time::timeout(deadline, async {
            loop {
                match self.events.recv().await {
                    Ok(CallEvent::StateChanged(state)) if state == want => return,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("event channel closed waiting for {:?}", want)
                    }
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {:?}", want));
    }

    /// Wait for the first event matching the predicate
    pub async fn wait_for_event(
        &mut self,
        mut pred: impl FnMut(&CallEvent) -> bool,
    ) -> CallEvent {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Let spawned tasks run without advancing time
    pub async fn settle() {
        for _ in 0..30 {
            tokio::task::yield_now().await;
        }
    }
}
