// =============================================================================
// StreamFanout — L5: per-subscriber push delivery with slow-consumer eviction
// =============================================================================
//
// Each streaming subscriber gets its own bounded outbound buffer. A publish
// that finds a subscriber's buffer full evicts that subscriber's oldest
// buffered update to make room (drop-oldest) and enqueues the new one,
// rather than blocking the publisher or dropping the new update — `tokio`'s
// `mpsc::Sender` has no way to pop from the send side, so the buffer is a
// plain `VecDeque` guarded by a lock, woken with a `Notify`, the same shape
// `signet-sdk`'s `SubscriptionBuffer` uses for its per-subscription queues.
// A subscriber whose buffer stays full across repeated publishes for longer
// than `slow_consumer_timeout` is marked CLOSING and torn down.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Quote, Ric, SubscriberState};

struct SubscriberQueue {
    buffer: Mutex<VecDeque<Quote>>,
    notify: Notify,
    closed: AtomicBool,
}

/// A single streaming client's outbound handle.
#[derive(Clone)]
pub struct StreamSubscriber {
    pub id: Uuid,
    pub rics: Vec<Ric>,
    queue: Arc<SubscriberQueue>,
}

impl StreamSubscriber {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// The receiving half of a subscriber's outbound buffer, driven by the
/// transport layer's write loop (e.g. a WebSocket task).
pub struct StreamReceiver {
    queue: Arc<SubscriberQueue>,
}

impl StreamReceiver {
    /// Wait for the next quote, or `None` once the subscriber has been
    /// unregistered (or the fanout has shut down) and its buffer is empty.
    pub async fn recv(&mut self) -> Option<Quote> {
        loop {
            if let Some(quote) = self.queue.buffer.lock().pop_front() {
                return Some(quote);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }
}

struct SubscriberEntry {
    queue: Arc<SubscriberQueue>,
    rics: Vec<Ric>,
    state: SubscriberState,
    first_full_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct FanoutMetrics {
    pub published: AtomicU64,
    pub dropped_oldest: AtomicU64,
    pub subscribers_evicted: AtomicU64,
    pub publishes_dropped_closing: AtomicU64,
}

pub struct StreamFanout {
    subscribers: RwLock<HashMap<Uuid, SubscriberEntry>>,
    queue_capacity: usize,
    slow_consumer_timeout: Duration,
    metrics: Arc<FanoutMetrics>,
}

impl StreamFanout {
    pub fn new(queue_capacity: usize, slow_consumer_timeout_ms: u64) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            queue_capacity,
            slow_consumer_timeout: Duration::from_millis(slow_consumer_timeout_ms),
            metrics: Arc::new(FanoutMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<FanoutMetrics> {
        self.metrics.clone()
    }

    /// Register a new streaming subscriber interested in `rics`. Returns the
    /// receiving half of its outbound buffer for the transport layer to
    /// drive (e.g. a WebSocket write loop).
    pub fn register(&self, rics: Vec<Ric>) -> (StreamSubscriber, StreamReceiver) {
        let queue = Arc::new(SubscriberQueue {
            buffer: Mutex::new(VecDeque::with_capacity(self.queue_capacity.min(1024))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let id = Uuid::new_v4();
        self.subscribers.write().insert(
            id,
            SubscriberEntry {
                queue: queue.clone(),
                rics: rics.clone(),
                state: SubscriberState::Active,
                first_full_at: None,
            },
        );
        (
            StreamSubscriber { id, rics, queue: queue.clone() },
            StreamReceiver { queue },
        )
    }

    /// Remove a subscriber outright (e.g. on client disconnect).
    pub fn unregister(&self, id: Uuid) {
        if let Some(entry) = self.subscribers.write().remove(&id) {
            entry.queue.closed.store(true, Ordering::Release);
            entry.queue.notify.notify_waiters();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Mark every subscriber closed and drop the table. Each writer's
    /// `recv()` observes end-of-stream once its buffer drains.
    pub fn shutdown(&self) {
        let mut subscribers = self.subscribers.write();
        let count = subscribers.len();
        for entry in subscribers.values() {
            entry.queue.closed.store(true, Ordering::Release);
            entry.queue.notify.notify_waiters();
        }
        subscribers.clear();
        if count > 0 {
            info!(count, "stream fanout closed all subscribers for shutdown");
        }
    }

    /// Publish a quote to every subscriber interested in `quote.ric`.
    /// Subscribers in CLOSING state never receive further publishes.
    pub fn publish(&self, quote: Quote) {
        let mut to_evict = Vec::new();
        {
            let mut subscribers = self.subscribers.write();
            for (id, entry) in subscribers.iter_mut() {
                if !entry.rics.contains(&quote.ric) {
                    continue;
                }
                match entry.state {
                    SubscriberState::Closing | SubscriberState::Closed => {
                        self.metrics.publishes_dropped_closing.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    SubscriberState::Active => {}
                }

                let mut buffer = entry.queue.buffer.lock();
                if buffer.len() < self.queue_capacity {
                    buffer.push_back(quote.clone());
                    drop(buffer);
                    self.metrics.published.fetch_add(1, Ordering::Relaxed);
                    entry.first_full_at = None;
                    entry.queue.notify.notify_waiters();
                    continue;
                }

                buffer.pop_front();
                buffer.push_back(quote.clone());
                drop(buffer);
                self.metrics.dropped_oldest.fetch_add(1, Ordering::Relaxed);
                entry.queue.notify.notify_waiters();

                let first_full = *entry.first_full_at.get_or_insert_with(Instant::now);
                if first_full.elapsed() >= self.slow_consumer_timeout {
                    entry.state = SubscriberState::Closing;
                    to_evict.push(*id);
                } else {
                    debug!(subscriber = %id, "subscriber queue full, dropping oldest update");
                }
            }
        }

        if !to_evict.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in to_evict {
                if let Some(entry) = subscribers.remove(&id) {
                    entry.queue.closed.store(true, Ordering::Release);
                    entry.queue.notify.notify_waiters();
                    self.metrics.subscribers_evicted.fetch_add(1, Ordering::Relaxed);
                    info!(subscriber = %id, "evicted slow consumer");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ric(s: &str) -> Ric {
        Ric::new(s).unwrap()
    }

    fn quote(r: &Ric) -> Quote {
        Quote::new(r.clone(), Utc::now())
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscriber() {
        let fanout = StreamFanout::new(4, 5000);
        let a = ric("A");
        let (_sub, mut rx) = fanout.register(vec![a.clone()]);
        fanout.publish(quote(&a));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.ric, a);
    }

    #[tokio::test]
    async fn publish_ignores_subscriber_not_interested_in_ric() {
        let fanout = StreamFanout::new(4, 5000);
        let a = ric("A");
        let b = ric("B");
        let (_sub, mut rx) = fanout.register(vec![b.clone()]);
        fanout.publish(quote(&a));
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn full_buffer_drops_oldest_and_keeps_newest() {
        let fanout = StreamFanout::new(2, 5000);
        let a = ric("A");
        let (_sub, mut rx) = fanout.register(vec![a.clone()]);

        let mut first = quote(&a);
        first.last = Some(rust_decimal_macros::dec!(1));
        let mut second = quote(&a);
        second.last = Some(rust_decimal_macros::dec!(2));
        let mut third = quote(&a);
        third.last = Some(rust_decimal_macros::dec!(3));

        fanout.publish(first);
        fanout.publish(second);
        fanout.publish(third);

        assert_eq!(rx.recv().await.unwrap().last, Some(rust_decimal_macros::dec!(2)));
        assert_eq!(rx.recv().await.unwrap().last, Some(rust_decimal_macros::dec!(3)));
        assert_eq!(fanout.metrics().dropped_oldest.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn full_queue_past_timeout_evicts_subscriber() {
        let fanout = StreamFanout::new(1, 10);
        let a = ric("A");
        let (_sub, _rx) = fanout.register(vec![a.clone()]);

        fanout.publish(quote(&a));
        fanout.publish(quote(&a));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fanout.publish(quote(&a));

        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(fanout.metrics().subscribers_evicted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unregister_removes_subscriber() {
        let fanout = StreamFanout::new(4, 5000);
        let a = ric("A");
        let (sub, _rx) = fanout.register(vec![a]);
        fanout.unregister(sub.id());
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unregister_wakes_a_blocked_receiver_with_none() {
        let fanout = StreamFanout::new(4, 5000);
        let a = ric("A");
        let (sub, mut rx) = fanout.register(vec![a]);
        let id = sub.id();
        let handle = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        fanout.unregister(id);
        assert_eq!(handle.await.unwrap(), None);
    }
}
