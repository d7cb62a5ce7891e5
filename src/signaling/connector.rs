//! Dialing capability for the signaling channel
//!
//! A connector turns an endpoint into a framed duplex of text frames. The
//! shipped [`WsConnector`] speaks WebSocket; tests substitute in-memory
//! connectors, and a degraded fallback mode is just another connector handed
//! to the transport.

use crate::error::ConnectError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

/// A framed duplex to the signaling endpoint.
///
/// Dropping `rx` to closed means the connection is gone; sends on `tx` after
/// that fail and are surfaced as not-connected by the transport.
pub struct SignalingChannel {
    /// Outbound frames
    pub tx: mpsc::UnboundedSender<String>,
    /// Inbound frames; `None` means the connection closed
    pub rx: mpsc::UnboundedReceiver<String>,
}

/// Dials one signaling endpoint in one transport mode.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Human-readable mode label for logs (e.g. `websocket`)
    fn mode(&self) -> &str;

    /// Establish a fresh channel to the endpoint
    async fn dial(&self) -> Result<SignalingChannel, ConnectError>;
}

/// WebSocket connector over `tokio-tungstenite`.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Create a connector for a `ws://` or `wss://` endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    fn mode(&self) -> &str {
        "websocket"
    }

    async fn dial(&self) -> Result<SignalingChannel, ConnectError> {
        debug!("dialing signaling endpoint: {}", self.url);

        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Sender task: frames from the channel onto the socket
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    error!("websocket send failed: {}", e);
                    break;
                }
            }
            debug!("websocket sender task terminated");
        });

        // Receiver task: socket frames into the channel
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("websocket closed by remote");
                        break;
                    }
                    Err(e) => {
                        error!("websocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            debug!("websocket receiver task terminated");
        });

        Ok(SignalingChannel {
            tx: out_tx,
            rx: in_rx,
        })
    }
}
