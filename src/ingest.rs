// =============================================================================
// IngestQueue — L2: bounded backpressure queue and worker pool
// =============================================================================
//
// Decouples the feed adapter's message-handling loop from the cost of
// applying an update to the quote cache (and driving validation/fan-out off
// the back of it). The queue is bounded: when full, `offer` reports back
// immediately so the caller can fall back to a direct apply rather than
// block the feed-reading loop.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::ApplyTask;

/// Outcome of offering a task to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Accepted into the bounded queue.
    Queued,
    /// Queue was full; caller should apply the task directly instead.
    QueueFull,
}

#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub enqueued: AtomicU64,
    pub queue_full: AtomicU64,
    pub applied: AtomicU64,
    pub dropped_stale: AtomicU64,
}

impl IngestMetrics {
    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        IngestMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestMetricsSnapshot {
    pub enqueued: u64,
    pub queue_full: u64,
    pub applied: u64,
    pub dropped_stale: u64,
}

/// The bounded queue sitting between the feed adapter and the worker pool.
pub struct IngestQueue {
    sender: mpsc::Sender<ApplyTask>,
    receiver: parking_lot::Mutex<Option<mpsc::Receiver<ApplyTask>>>,
    capacity: usize,
    staleness: std::time::Duration,
    metrics: Arc<IngestMetrics>,
}

impl IngestQueue {
    pub fn new(capacity: usize, staleness_ms: u64) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: parking_lot::Mutex::new(Some(receiver)),
            capacity,
            staleness: std::time::Duration::from_millis(staleness_ms),
            metrics: Arc::new(IngestMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        self.metrics.clone()
    }

    /// Fraction of the queue's capacity currently occupied, in `[0.0, 1.0]`.
    /// Backs the `backpressure_queue_utilization` gauge and the `backpressure`
    /// field returned from `Subscribe`.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        let free = self.sender.capacity();
        (self.capacity.saturating_sub(free)) as f64 / self.capacity as f64
    }

    /// Non-blocking offer. Never awaits; returns immediately whether the
    /// queue accepted the task or was full.
    pub fn offer(&self, task: ApplyTask) -> OfferOutcome {
        match self.sender.try_send(task) {
            Ok(()) => {
                self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                OfferOutcome::Queued
            }
            Err(_) => {
                self.metrics.queue_full.fetch_add(1, Ordering::Relaxed);
                OfferOutcome::QueueFull
            }
        }
    }

    /// Take the receiver out so it can be moved into a worker pool. Callable
    /// exactly once; subsequent calls return `None`.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<ApplyTask>> {
        self.receiver.lock().take()
    }

    pub fn staleness(&self) -> std::time::Duration {
        self.staleness
    }
}

/// Runs `worker_count` concurrent consumers pulling `ApplyTask`s off a single
/// receiver, shared behind a `tokio::sync::Mutex` since `mpsc::Receiver` has
/// only one owner. Each task older than `staleness` is dropped without being
/// applied.
pub async fn run_worker_pool<F>(
    receiver: mpsc::Receiver<ApplyTask>,
    worker_count: usize,
    staleness: std::time::Duration,
    metrics: Arc<IngestMetrics>,
    apply: F,
    cancellation: CancellationToken,
) where
    F: Fn(ApplyTask) + Send + Sync + 'static,
{
    let apply = Arc::new(apply);
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    let mut handles = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let receiver = receiver.clone();
        let apply = apply.clone();
        let metrics = metrics.clone();
        let cancellation = cancellation.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let next = {
                    let mut guard = receiver.lock().await;
                    tokio::select! {
                        biased;
                        _ = cancellation.cancelled() => None,
                        item = guard.recv() => item,
                    }
                };
                match next {
                    Some(task) => {
                        if task.age() > staleness {
                            metrics.dropped_stale.fetch_add(1, Ordering::Relaxed);
                            debug!(worker = id, ric = %task.ric, "dropped stale ingest task");
                            continue;
                        }
                        apply(task);
                        metrics.applied.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        if cancellation.is_cancelled() {
                            break;
                        }
                        // channel closed
                        break;
                    }
                }
            }
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "ingest worker task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Quote, Ric};
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    fn task(ric_str: &str) -> ApplyTask {
        let ric = Ric::new(ric_str).unwrap();
        let quote = Quote::new(ric.clone(), Utc::now());
        ApplyTask::new(ric, quote)
    }

    #[test]
    fn offer_accepts_until_capacity_then_reports_full() {
        let queue = IngestQueue::new(2, 5000);
        assert_eq!(queue.offer(task("A")), OfferOutcome::Queued);
        assert_eq!(queue.offer(task("B")), OfferOutcome::Queued);
        assert_eq!(queue.offer(task("C")), OfferOutcome::QueueFull);
        let snap = queue.metrics().snapshot();
        assert_eq!(snap.enqueued, 2);
        assert_eq!(snap.queue_full, 1);
    }

    #[test]
    fn utilization_tracks_occupied_fraction_of_capacity() {
        let queue = IngestQueue::new(4, 5000);
        assert_eq!(queue.utilization(), 0.0);
        queue.offer(task("A"));
        queue.offer(task("B"));
        assert_eq!(queue.utilization(), 0.5);
    }

    #[tokio::test]
    async fn worker_pool_applies_tasks_and_drops_stale() {
        let queue = IngestQueue::new(10, 10);
        let fresh = task("A");
        let mut stale = task("B");
        stale.enqueued_at -= std::time::Duration::from_millis(50);

        queue.offer(fresh);
        queue.offer(stale);

        let receiver = queue.take_receiver().unwrap();
        let metrics = queue.metrics();
        let applied = Arc::new(StdMutex::new(Vec::new()));
        let applied_clone = applied.clone();
        let cancellation = CancellationToken::new();
        let cancel_clone = cancellation.clone();

        let pool = tokio::spawn(run_worker_pool(
            receiver,
            1,
            std::time::Duration::from_millis(10),
            metrics.clone(),
            move |t| applied_clone.lock().unwrap().push(t.ric.clone()),
            cancellation.clone(),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel_clone.cancel();
        let _ = tokio::time::timeout(std::time::Duration::from_millis(200), pool).await;

        let applied_rics = applied.lock().unwrap();
        assert_eq!(applied_rics.len(), 1);
        assert_eq!(applied_rics[0].as_str(), "A");

        let snap = metrics.snapshot();
        assert_eq!(snap.dropped_stale, 1);
    }
}
