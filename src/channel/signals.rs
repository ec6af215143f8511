//! External reconnect signals
//!
//! The original client listened for browser visibility and network-restore
//! events to reconnect sooner than the pending backoff timer would. Here the
//! environment side is a small pluggable [`SignalSource`] trait, so the state
//! machine stays portable; only the adapter differs per target. The crate
//! ships a channel-backed [`ManualSignalSource`] for embedders and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// An environment condition that makes an immediate reconnect attempt worth
/// trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectSignal {
    /// The embedding environment became active again (e.g. a suspended tab
    /// was resumed).
    Resumed,
    /// Network connectivity was restored.
    NetworkRestored,
}

/// Identifier for one signal subscription.
pub type SubscriptionId = u64;

/// Source of reconnect signals. Implementations fan each signal out to every
/// subscribed sender.
pub trait SignalSource: Send + Sync {
    fn subscribe(&self, tx: mpsc::Sender<ReconnectSignal>) -> SubscriptionId;
    /// Idempotent.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Channel-backed signal source. The embedder calls [`ManualSignalSource::raise`]
/// when its platform reports a wake-up or connectivity change.
#[derive(Clone, Default)]
pub struct ManualSignalSource {
    inner: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<ReconnectSignal>>,
}

impl ManualSignalSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `signal` to every live subscriber. Subscribers whose channel
    /// is gone are dropped; a full queue just skips this delivery (signals
    /// are hints, not commands).
    pub fn raise(&self, signal: ReconnectSignal) {
        let mut registry = self.inner.lock().expect("signal registry poisoned");
        registry.subscribers.retain(|id, tx| match tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscription = id, ?signal, "signal queue full, skipping");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("signal registry poisoned")
            .subscribers
            .len()
    }
}

impl SignalSource for ManualSignalSource {
    fn subscribe(&self, tx: mpsc::Sender<ReconnectSignal>) -> SubscriptionId {
        let mut registry = self.inner.lock().expect("signal registry poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, tx);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self.inner.lock().expect("signal registry poisoned");
        registry.subscribers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raise_reaches_subscriber() {
        let source = ManualSignalSource::new();
        let (tx, mut rx) = mpsc::channel(4);
        source.subscribe(tx);

        source.raise(ReconnectSignal::NetworkRestored);
        assert_eq!(rx.recv().await, Some(ReconnectSignal::NetworkRestored));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let source = ManualSignalSource::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = source.subscribe(tx);

        source.unsubscribe(id);
        source.unsubscribe(id); // idempotent
        source.raise(ReconnectSignal::Resumed);
        assert!(rx.try_recv().is_err());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dead_subscriber_pruned_on_raise() {
        let source = ManualSignalSource::new();
        let (tx, rx) = mpsc::channel(4);
        source.subscribe(tx);
        drop(rx);

        source.raise(ReconnectSignal::Resumed);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_all_notified() {
        let source = ManualSignalSource::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        source.subscribe(tx_a);
        source.subscribe(tx_b);

        source.raise(ReconnectSignal::NetworkRestored);
        assert_eq!(rx_a.recv().await, Some(ReconnectSignal::NetworkRestored));
        assert_eq!(rx_b.recv().await, Some(ReconnectSignal::NetworkRestored));
    }
}
