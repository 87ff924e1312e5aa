//! Wake Channel
//!
//! Bounded channel carrying wake requests from the heartbeat daemon to
//! the reasoning loop. The boundary is an explicit contract: senders
//! never block, and a full queue drops the newest request with a warning
//! rather than stalling a tick.

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the wake queue. Wake reasons are coarse "come look"
/// signals; a reasoning loop that is 16 reasons behind does not need a
/// 17th.
pub const WAKE_CHANNEL_CAPACITY: usize = 16;

/// Receiving half handed to the reasoning loop.
pub type WakeReceiver = mpsc::Receiver<String>;

/// Sending half owned by the daemon (and cloned into anything that may
/// raise a wake).
#[derive(Clone)]
pub struct WakeSender {
    tx: mpsc::Sender<String>,
}

/// Create a bounded wake channel.
pub fn wake_channel() -> (WakeSender, WakeReceiver) {
    let (tx, rx) = mpsc::channel(WAKE_CHANNEL_CAPACITY);
    (WakeSender { tx }, rx)
}

impl WakeSender {
    /// Request a wake with a single-line, human-readable reason.
    ///
    /// Non-blocking. Each qualifying event sends at most one request.
    pub fn request(&self, reason: impl Into<String>) {
        let reason = reason.into();
        match self.tx.try_send(reason) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("Wake queue full, dropping request: {dropped}");
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!("Wake receiver gone, discarding request: {dropped}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_arrive_in_order() {
        let (tx, mut rx) = wake_channel();
        tx.request("first");
        tx.request("second");
        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, mut rx) = wake_channel();
        for i in 0..WAKE_CHANNEL_CAPACITY + 5 {
            tx.request(format!("reason {i}"));
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, WAKE_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn closed_receiver_is_not_an_error() {
        let (tx, rx) = wake_channel();
        drop(rx);
        tx.request("nobody listening");
    }
}
