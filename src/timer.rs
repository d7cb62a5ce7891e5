//! Cancellable deadline shared by every suspend point
//!
//! Connect acknowledgment, accept-path media acquisition, per-peer
//! negotiation, and call teardown all schedule their forced-fallback through
//! this one abstraction instead of hand-rolled timers per call site.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Marker returned when a bounded operation ran past its window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired;

/// Run `fut` to completion unless `window` elapses first.
///
/// The inline counterpart to [`Deadline`] for linear `await` points; both
/// exist so no suspend point hand-rolls its own timer.
pub async fn expire_after<F: Future>(window: Duration, fut: F) -> Result<F::Output, Expired> {
    tokio::time::timeout(window, fut).await.map_err(|_| Expired)
}

/// A single-shot deadline that posts a message into a channel on expiry.
///
/// Cancelling (or dropping) the deadline guarantees the message is never
/// delivered.
#[derive(Debug)]
pub struct Deadline {
    handle: JoinHandle<()>,
}

impl Deadline {
    /// Schedule `msg` to be sent on `tx` after `after` elapses.
    pub fn schedule<M: Send + 'static>(
        after: Duration,
        tx: mpsc::UnboundedSender<M>,
        msg: M,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // Receiver may be gone already; expiry is then a no-op.
            let _ = tx.send(msg);
        });

        Self { handle }
    }

    /// Cancel the deadline. Safe to call after expiry.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
