// =============================================================================
// LifecycleSupervisor — L7: startup/shutdown coordination
// =============================================================================
//
// Starts L1-L6 in dependency order and tears them down in reverse, each step
// bounded so a hung component cannot stall shutdown past `total_budget`.
// Shutdown sequence: stop accepting new dispatch work, drain the ingest
// worker pool within `drain_timeout`, mark every fan-out subscriber CLOSING
// and close its channel, disconnect the upstream feed, then cancel the
// issue-tracker reaper.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fanout::StreamFanout;
use crate::feed_adapter::FeedAdapter;
use crate::ingest::{run_worker_pool, IngestQueue};
use crate::quality::DataQualityCore;
use crate::quote_cache::QuoteCache;
use crate::runtime_config::RuntimeConfig;
use crate::upstream::UpstreamFeed;

/// Coordinates startup and graceful shutdown of the whole system for a given
/// `UpstreamFeed` implementation `F`.
pub struct LifecycleSupervisor<F: UpstreamFeed + 'static> {
    pub cache: QuoteCache,
    pub ingest: Arc<IngestQueue>,
    pub fanout: Arc<StreamFanout>,
    pub feed_adapter: Arc<FeedAdapter<F>>,
    pub quality: Arc<DataQualityCore>,
    cancellation: CancellationToken,
    drain_timeout: Duration,
    total_budget: Duration,
    tasks: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<F: UpstreamFeed + 'static> LifecycleSupervisor<F> {
    pub fn new(feed: Arc<F>, config: &RuntimeConfig) -> Self {
        let cache = QuoteCache::new();
        let ingest = Arc::new(IngestQueue::new(
            config.ingest.queue_capacity,
            config.ingest.task_staleness_ms,
        ));
        let fanout = Arc::new(StreamFanout::new(
            config.fanout.subscriber_queue_capacity,
            config.fanout.slow_consumer_timeout_ms,
        ));
        let quality = Arc::new(DataQualityCore::new(&config.quality));
        let feed_adapter = Arc::new(FeedAdapter::new(
            feed,
            cache.clone(),
            ingest.clone(),
            fanout.clone(),
            quality.clone(),
        ));

        Self {
            cache,
            ingest,
            fanout,
            feed_adapter,
            quality,
            cancellation: CancellationToken::new(),
            drain_timeout: Duration::from_millis(config.shutdown.drain_timeout_ms),
            total_budget: Duration::from_secs(config.shutdown.total_budget_sec),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Start every layer: feed connect/registration (L3), the ingest worker
    /// pool (L2), the feed adapter's dispatch loop, and the issue-tracker
    /// reaper (§4.6.3: trims records older than 24h every 5 min).
    pub async fn start(&self, worker_count: usize) -> anyhow::Result<()> {
        self.feed_adapter.start().await?;

        let receiver = self
            .ingest
            .take_receiver()
            .ok_or_else(|| anyhow::anyhow!("ingest receiver already taken"))?;
        let cache = self.cache.clone();
        let metrics = self.ingest.metrics();
        let staleness = self.ingest.staleness();
        let cancellation = self.cancellation.clone();

        let worker_handle = tokio::spawn(async move {
            run_worker_pool(
                receiver,
                worker_count,
                staleness,
                metrics,
                move |task| cache.put_latest(task.quote),
                cancellation,
            )
            .await;
        });

        let adapter = self.feed_adapter.clone();
        let dispatch_cancellation = self.cancellation.clone();
        let dispatch_handle = tokio::spawn(async move {
            adapter.run(dispatch_cancellation).await;
        });

        let tracker = self.quality.tracker();
        let reaper_cancellation = self.cancellation.clone();
        let reaper_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    biased;
                    _ = reaper_cancellation.cancelled() => break,
                    _ = interval.tick() => tracker.trim_older_than(24),
                }
            }
        });

        self.tasks.lock().await.push(worker_handle);
        self.tasks.lock().await.push(dispatch_handle);
        self.tasks.lock().await.push(reaper_handle);

        info!("lifecycle supervisor started");
        Ok(())
    }

    /// Graceful shutdown: cancel background loops, wait up to
    /// `drain_timeout` for the ingest worker pool, disconnect the feed, and
    /// bound the whole sequence by `total_budget`.
    pub async fn shutdown(&self) {
        let sequence = async {
            self.cancellation.cancel();

            let mut tasks = self.tasks.lock().await;
            for task in tasks.drain(..) {
                if tokio::time::timeout(self.drain_timeout, task).await.is_err() {
                    warn!("background task did not drain within timeout");
                }
            }

            self.fanout.shutdown();
            self.feed_adapter.stop().await;
        };

        if tokio::time::timeout(self.total_budget, sequence).await.is_err() {
            warn!("shutdown exceeded total budget, proceeding anyway");
        }
        info!("lifecycle supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data_service::{DirectMarketDataService, MarketDataService};
    use crate::upstream::{price_message, InMemoryUpstreamFeed};
    use rust_decimal_macros::dec;

    fn test_config() -> RuntimeConfig {
        let mut cfg = RuntimeConfig::default();
        cfg.ingest.worker_count = 2;
        cfg.shutdown.drain_timeout_ms = 500;
        cfg.shutdown.total_budget_sec = 5;
        cfg
    }

    /// S1: subscribe to a RIC, receive an upstream update, read it back via
    /// GetLatest.
    #[tokio::test]
    async fn scenario_subscribe_ingest_get_latest() {
        let feed = Arc::new(InMemoryUpstreamFeed::new(16));
        feed.connect().await.unwrap();
        let config = test_config();
        let supervisor = LifecycleSupervisor::new(feed.clone(), &config);

        let service = DirectMarketDataService::new(
            supervisor.cache.clone(),
            feed.clone(),
            supervisor.ingest.clone(),
        );
        let ric = crate::types::Ric::new("IBM.N").unwrap();
        service.subscribe(&[ric.clone()]).await.unwrap();

        supervisor.start(config.ingest.worker_count).await.unwrap();

        feed.push(price_message(&ric, dec!(100.00), dec!(100.05))).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let latest = service.get_latest(&[ric.clone()]);
        assert!(latest.contains_key(&ric));

        supervisor.shutdown().await;
    }

    /// S2: validating a bad quote surfaces through DataQualityCore's
    /// tracker and degrades its quality score.
    #[tokio::test]
    async fn scenario_bad_quote_degrades_quality_score() {
        let feed = Arc::new(InMemoryUpstreamFeed::new(16));
        let config = test_config();
        let supervisor = LifecycleSupervisor::new(feed.clone(), &config);
        let ric = crate::types::Ric::new("IBM.N").unwrap();

        let mut bad_quote = crate::types::Quote::new(ric.clone(), chrono::Utc::now());
        bad_quote.bid = Some(dec!(-1));
        supervisor.quality.validate(&bad_quote, None);

        assert!(supervisor.quality.quality_score(&ric) < 100.0);
    }

    /// S3: shutdown completes within the configured budget even with an
    /// active worker pool and dispatch loop running.
    #[tokio::test]
    async fn scenario_shutdown_completes_within_budget() {
        let feed = Arc::new(InMemoryUpstreamFeed::new(16));
        let config = test_config();
        let supervisor = LifecycleSupervisor::new(feed, &config);
        supervisor.start(config.ingest.worker_count).await.unwrap();

        let start = std::time::Instant::now();
        supervisor.shutdown().await;
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
