//! Signaling transport with reconnection and transport downgrade

use super::connector::{SignalingChannel, SignalingConnector};
use super::protocol::{ClientFrame, HelloParams, ServerFrame, SignalEvent, SignalKind};
use crate::config::ReconnectPolicy;
use crate::error::ConnectError;
use crate::events::{ParticipantId, TransportEvent};
use crate::timer::{expire_after, Expired};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

/// Handler invoked for every delivered event of a subscribed kind.
///
/// Handlers run on the transport's reader task in registration order; a
/// panicking handler is caught and logged without crashing the loop.
pub type SignalHandler = Arc<dyn Fn(SignalEvent) + Send + Sync>;

/// Identifies one subscription for [`SignalingTransport::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Disconnected,
    Connecting,
    Connected,
}

struct Shared {
    status: RwLock<Status>,
    identity: RwLock<Option<ParticipantId>>,
    outbox: RwLock<Option<mpsc::UnboundedSender<String>>>,
    subscribers: RwLock<HashMap<SignalKind, Vec<(u64, SignalHandler)>>>,
    next_subscription: AtomicU64,
    /// Bumped by `connect`/`disconnect`; stale tasks observe the change and
    /// stand down.
    epoch: AtomicU64,
    user_disconnect: AtomicBool,
    notify: broadcast::Sender<TransportEvent>,
}

/// One logical connection to the signaling server.
///
/// Delivers typed events bidirectionally, reconnects with exponential
/// backoff after unexpected drops, and downgrades once to a fallback
/// transport mode when the primary mode fails its first dial. Holds no
/// business state about calls.
pub struct SignalingTransport {
    primary: Arc<dyn SignalingConnector>,
    fallback: Option<Arc<dyn SignalingConnector>>,
    policy: ReconnectPolicy,
    connect_window: Duration,
    shared: Arc<Shared>,
}

impl SignalingTransport {
    /// Create a transport over a primary connector and an optional degraded
    /// fallback mode.
    pub fn new(
        primary: Arc<dyn SignalingConnector>,
        fallback: Option<Arc<dyn SignalingConnector>>,
        policy: ReconnectPolicy,
        connect_window: Duration,
    ) -> Self {
        let (notify, _) = broadcast::channel(16);
        Self {
            primary,
            fallback,
            policy,
            connect_window,
            shared: Arc::new(Shared {
                status: RwLock::new(Status::Disconnected),
                identity: RwLock::new(None),
                outbox: RwLock::new(None),
                subscribers: RwLock::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
                user_disconnect: AtomicBool::new(false),
                notify,
            }),
        }
    }

    /// Establish the channel and present `identity`.
    ///
    /// Fails with [`ConnectError::Timeout`] when no acknowledgment arrives
    /// within the configured window and [`ConnectError::AuthRejected`] when
    /// the endpoint refuses the identity. If the primary mode fails its
    /// first dial for transport reasons, the fallback mode is tried once
    /// before failure is surfaced; auth rejections surface immediately.
    pub async fn connect(&self, identity: ParticipantId) -> Result<(), ConnectError> {
        {
            let mut status = self.shared.status.write().await;
            if *status != Status::Disconnected {
                return Err(ConnectError::AlreadyConnected);
            }
            *status = Status::Connecting;
        }

        self.shared.user_disconnect.store(false, Ordering::SeqCst);
        *self.shared.identity.write().await = Some(identity.clone());
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let outcome = match Self::establish(self.primary.as_ref(), &identity, self.connect_window)
            .await
        {
            Ok(channel) => Ok((Arc::clone(&self.primary), channel)),
            Err(e @ ConnectError::AuthRejected(_)) => Err(e),
            Err(primary_err) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        "{} transport failed ({}), downgrading to {}",
                        self.primary.mode(),
                        primary_err,
                        fallback.mode()
                    );
                    Self::establish(fallback.as_ref(), &identity, self.connect_window)
                        .await
                        .map(|channel| (Arc::clone(fallback), channel))
                }
                None => Err(primary_err),
            },
        };

        match outcome {
            Ok((connector, channel)) => {
                info!(mode = connector.mode(), "signaling transport connected");
                Self::install(&self.shared, channel.tx.clone()).await;
                tokio::spawn(Self::run_connection(
                    Arc::clone(&self.shared),
                    connector,
                    self.policy.clone(),
                    self.connect_window,
                    epoch,
                    channel.rx,
                ));
                Ok(())
            }
            Err(e) => {
                *self.shared.status.write().await = Status::Disconnected;
                Err(e)
            }
        }
    }

    /// Caller-initiated disconnect. Suppresses reconnection.
    pub async fn disconnect(&self) {
        self.shared.user_disconnect.store(true, Ordering::SeqCst);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(outbox) = self.shared.outbox.write().await.take() {
            if let Ok(frame) = ClientFrame::Bye(super::protocol::ByeParams { reason: None }).to_json()
            {
                let _ = outbox.send(frame);
            }
        }

        *self.shared.status.write().await = Status::Disconnected;
        let _ = self.shared.notify.send(TransportEvent::Disconnected);
        info!("signaling transport disconnected by caller");
    }

    /// Send an event. Fails fast with [`ConnectError::NotConnected`] when the
    /// channel is down; nothing is queued.
    pub async fn send(&self, event: SignalEvent) -> Result<(), ConnectError> {
        let outbox = self.shared.outbox.read().await.clone();
        let Some(outbox) = outbox else {
            return Err(ConnectError::NotConnected);
        };

        let frame = ClientFrame::Event(event)
            .to_json()
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;
        outbox.send(frame).map_err(|_| ConnectError::NotConnected)
    }

    /// Register a handler for one event kind. Handlers of the same kind run
    /// in registration order.
    pub async fn subscribe<F>(&self, kind: SignalKind, handler: F) -> SubscriptionId
    where
        F: Fn(SignalEvent) + Send + Sync + 'static,
    {
        let id = self
            .shared
            .next_subscription
            .fetch_add(1, Ordering::SeqCst);
        let mut subscribers = self.shared.subscribers.write().await;
        subscribers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        SubscriptionId(id)
    }

    /// Remove a previously registered handler
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.shared.subscribers.write().await;
        for entries in subscribers.values_mut() {
            entries.retain(|(entry_id, _)| *entry_id != id.0);
        }
    }

    /// Transport-level health notifications
    pub fn notifications(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.notify.subscribe()
    }

    /// Whether the channel is currently connected
    pub async fn is_connected(&self) -> bool {
        *self.shared.status.read().await == Status::Connected
    }

    async fn install(shared: &Arc<Shared>, tx: mpsc::UnboundedSender<String>) {
        *shared.outbox.write().await = Some(tx);
        *shared.status.write().await = Status::Connected;
        let _ = shared.notify.send(TransportEvent::Connected);
    }

    /// Dial and run the hello/ack handshake within the connect window.
    async fn establish(
        connector: &dyn SignalingConnector,
        identity: &str,
        window: Duration,
    ) -> Result<SignalingChannel, ConnectError> {
        let handshake = async {
            let mut channel = connector.dial().await?;

            let hello = ClientFrame::Hello(HelloParams {
                identity: identity.to_string(),
                connection_id: uuid::Uuid::new_v4().to_string(),
            });
            let frame = hello
                .to_json()
                .map_err(|e| ConnectError::Unreachable(e.to_string()))?;
            channel
                .tx
                .send(frame)
                .map_err(|_| ConnectError::Unreachable("channel closed before hello".to_string()))?;

            loop {
                match channel.rx.recv().await {
                    Some(frame) => match ServerFrame::from_json(&frame) {
                        Ok(ServerFrame::Ack(_)) => return Ok(channel),
                        Ok(ServerFrame::Reject(params)) => {
                            return Err(ConnectError::AuthRejected(params.reason))
                        }
                        Ok(_) => debug!("ignoring frame before acknowledgment"),
                        Err(e) => warn!("malformed frame during handshake: {}", e),
                    },
                    None => {
                        return Err(ConnectError::Unreachable(
                            "connection closed during handshake".to_string(),
                        ))
                    }
                }
            }
        };

        match expire_after(window, handshake).await {
            Ok(result) => result,
            Err(Expired) => Err(ConnectError::Timeout),
        }
    }

    /// Drive one established connection: dispatch inbound frames, then on an
    /// unexpected drop walk the reconnect policy on the already-selected
    /// mode. Exits when superseded, on caller disconnect, or after the
    /// policy is exhausted.
    async fn run_connection(
        shared: Arc<Shared>,
        connector: Arc<dyn SignalingConnector>,
        policy: ReconnectPolicy,
        window: Duration,
        epoch: u64,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            while let Some(frame) = rx.recv().await {
                if shared.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                Self::handle_frame(&shared, &frame).await;
            }

            if shared.epoch.load(Ordering::SeqCst) != epoch
                || shared.user_disconnect.load(Ordering::SeqCst)
            {
                return;
            }

            warn!(mode = connector.mode(), "signaling connection lost");
            *shared.status.write().await = Status::Disconnected;
            shared.outbox.write().await.take();
            let _ = shared.notify.send(TransportEvent::Disconnected);

            match Self::reconnect(&shared, connector.as_ref(), &policy, window, epoch).await {
                Some(channel) => {
                    info!(mode = connector.mode(), "signaling transport reconnected");
                    Self::install(&shared, channel.tx.clone()).await;
                    rx = channel.rx;
                }
                None => return,
            }
        }
    }

    async fn reconnect(
        shared: &Arc<Shared>,
        connector: &dyn SignalingConnector,
        policy: &ReconnectPolicy,
        window: Duration,
        epoch: u64,
    ) -> Option<SignalingChannel> {
        let mut attempt = 0u32;

        while policy.should_retry(attempt) {
            let backoff = policy.calculate_backoff(attempt);
            info!(
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "scheduling signaling reconnect"
            );
            tokio::time::sleep(backoff).await;

            if shared.epoch.load(Ordering::SeqCst) != epoch
                || shared.user_disconnect.load(Ordering::SeqCst)
            {
                return None;
            }

            let identity = shared.identity.read().await.clone()?;
            match Self::establish(connector, &identity, window).await {
                Ok(channel) => return Some(channel),
                Err(e) => warn!(attempt = attempt + 1, "reconnect attempt failed: {}", e),
            }

            attempt += 1;
        }

        if shared.epoch.load(Ordering::SeqCst) == epoch
            && !shared.user_disconnect.load(Ordering::SeqCst)
        {
            warn!(
                attempts = policy.max_attempts,
                "signaling reconnect attempts exhausted"
            );
            let _ = shared.notify.send(TransportEvent::ReconnectExhausted);
        }
        None
    }

    async fn handle_frame(shared: &Arc<Shared>, frame: &str) {
        match ServerFrame::from_json(frame) {
            Ok(ServerFrame::Event(event)) => Self::dispatch(shared, event).await,
            Ok(other) => debug!("ignoring control frame: {:?}", other),
            // Malformed payloads are dropped, never fatal.
            Err(e) => warn!("dropping malformed signaling frame: {}", e),
        }
    }

    async fn dispatch(shared: &Arc<Shared>, event: SignalEvent) {
        let kind = event.kind();
        let handlers: Vec<SignalHandler> = {
            let subscribers = shared.subscribers.read().await;
            subscribers
                .get(&kind)
                .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!(?kind, "no subscribers for signaling event");
            return;
        }

        for handler in handlers {
            let delivered = event.clone();
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(delivered)));
            if outcome.is_err() {
                warn!(?kind, "signal handler panicked; transport loop continues");
            }
        }
    }
}
