// =============================================================================
// FeedAdapter — L3: upstream feed driver
// =============================================================================
//
// Owns the connection to an `UpstreamFeed`, extracts the fields the rest of
// the system cares about (BID/ASK/TRDPRC_1/ACVOL_1) from each message, and
// publishes the resulting Quote onward: validated and fanned out to stream
// subscribers synchronously (L6, L5), then queued into the ingest path (L2)
// with a direct-apply fallback when the queue is full.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ServiceError;
use crate::fanout::StreamFanout;
use crate::ingest::{IngestQueue, OfferOutcome};
use crate::quality::DataQualityCore;
use crate::quote_cache::QuoteCache;
use crate::types::{ApplyTask, Quote, Ric};
use crate::upstream::{FieldValue, UpstreamFeed, UpstreamMessage, FIELD_ACVOL_1, FIELD_ASK, FIELD_BID, FIELD_TRDPRC_1};

/// Adapter lifecycle state, matching the NEW -> STARTING -> RUNNING ->
/// STOPPING -> STOPPED progression the supervisor drives it through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    New,
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Default)]
pub struct FeedAdapterMetrics {
    pub messages_received: AtomicU64,
}

/// Build a Quote by extracting the known field codes from an upstream
/// message, carrying forward any fields the cache already has for that RIC
/// (an update frame need not repeat every field).
pub fn apply_fields(ric: Ric, existing: Option<Quote>, message: &UpstreamMessage) -> Quote {
    let mut quote = existing.unwrap_or_else(|| Quote::new(ric.clone(), message.received_at));
    quote.timestamp = message.received_at;

    for (code, value) in &message.fields {
        match (*code, value) {
            (FIELD_BID, FieldValue::Price(p)) => quote.bid = Some(*p),
            (FIELD_ASK, FieldValue::Price(p)) => quote.ask = Some(*p),
            (FIELD_TRDPRC_1, FieldValue::Price(p)) => quote.last = Some(*p),
            (FIELD_ACVOL_1, FieldValue::Count(c)) => quote.volume = Some(*c),
            _ => {}
        }
    }
    quote
}

pub struct FeedAdapter<F: UpstreamFeed> {
    feed: Arc<F>,
    cache: QuoteCache,
    ingest: Arc<IngestQueue>,
    fanout: Arc<StreamFanout>,
    quality: Arc<DataQualityCore>,
    state: parking_lot::RwLock<AdapterState>,
    metrics: Arc<FeedAdapterMetrics>,
}

impl<F: UpstreamFeed + 'static> FeedAdapter<F> {
    pub fn new(
        feed: Arc<F>,
        cache: QuoteCache,
        ingest: Arc<IngestQueue>,
        fanout: Arc<StreamFanout>,
        quality: Arc<DataQualityCore>,
    ) -> Self {
        Self {
            feed,
            cache,
            ingest,
            fanout,
            quality,
            state: parking_lot::RwLock::new(AdapterState::New),
            metrics: Arc::new(FeedAdapterMetrics::default()),
        }
    }

    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    pub fn metrics(&self) -> Arc<FeedAdapterMetrics> {
        self.metrics.clone()
    }

    /// Connect to the upstream and register every currently-subscribed RIC.
    /// Transitions NEW -> STARTING -> RUNNING, or back to NEW on failure.
    pub async fn start(&self) -> Result<(), ServiceError> {
        *self.state.write() = AdapterState::Starting;
        self.feed.connect().await?;
        for ric in self.cache.subscribed() {
            self.feed.register_client(ric).await?;
        }
        *self.state.write() = AdapterState::Running;
        info!("feed adapter running");
        Ok(())
    }

    /// Run the dispatch loop until `cancellation` fires or the feed closes.
    /// Each message is parsed into a `Quote`, validated and fanned out
    /// synchronously, then queued via IngestQueue (applied directly to the
    /// cache when the queue is full so a burst never stalls the dispatch
    /// loop waiting on backpressure).
    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                msg = self.feed.dispatch() => msg,
            };

            let Some(message) = message else {
                warn!("upstream feed closed");
                break;
            };
            self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);

            let ric = message.ric.clone();
            let existing = self.cache.get_latest(&[ric.clone()]).remove(&ric);
            let quote = apply_fields(ric.clone(), existing.clone(), &message);

            // Validate and fan out synchronously, ahead of the ingest queue,
            // so invalid data is flagged and subscribers are pushed the
            // update at the earliest point regardless of queue pressure.
            self.quality.validate(&quote, existing.as_ref());
            self.fanout.publish(quote.clone());

            let task = ApplyTask::new(ric.clone(), quote.clone());
            match self.ingest.offer(task) {
                OfferOutcome::Queued => {}
                OfferOutcome::QueueFull => {
                    debug!(ric = %ric, "ingest queue full, applying directly");
                    self.cache.put_latest(quote);
                }
            }
        }
        *self.state.write() = AdapterState::Stopped;
    }

    /// Disconnect from the upstream. Transitions RUNNING -> STOPPING ->
    /// STOPPED.
    pub async fn stop(&self) {
        *self.state.write() = AdapterState::Stopping;
        self.feed.disconnect().await;
        *self.state.write() = AdapterState::Stopped;
        info!("feed adapter stopped");
    }
}
