// =============================================================================
// MarketDataService — the capability set external callers see
// =============================================================================
//
// `get_latest`/`subscribed` stay synchronous: they only ever touch the
// in-memory cache/handle table. `subscribe`/`unsubscribe` are `async_trait`
// methods because, for a RIC with no already-open handle, they round-trip to
// the upstream feed's `registerClient`/`unregister_client` — the same
// capability `FeedAdapter` drives on startup. Both the direct cache-backed
// implementation and ResilienceGate implement it, so code written against
// `dyn MarketDataService` works identically whether or not resilience
// wrapping sits in front.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::ingest::IngestQueue;
use crate::quote_cache::QuoteCache;
use crate::types::{Quote, Ric};
use crate::upstream::UpstreamFeed;

/// Result of a subscribe call: which RICs are now newly tracked versus
/// already had an open handle from this same service instance, how many
/// subscriptions this service instance now holds in total, and the ingest
/// queue's current backpressure utilization (`[0.0, 1.0]`).
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeOutcome {
    pub subscribed: Vec<Ric>,
    pub total_subscriptions: usize,
    pub backpressure: f64,
}

/// Result of an unsubscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeOutcome {
    pub unsubscribed: Vec<Ric>,
    pub remaining_subscriptions: usize,
}

#[async_trait]
pub trait MarketDataService: Send + Sync {
    fn get_latest(&self, rics: &[Ric]) -> HashMap<Ric, Quote>;
    async fn subscribe(&self, rics: &[Ric]) -> Result<SubscribeOutcome, ServiceError>;
    async fn unsubscribe(&self, rics: &[Ric]) -> UnsubscribeOutcome;
    fn subscribed(&self) -> Vec<Ric>;
}

/// Direct, cache-backed implementation with no resilience wrapping. Holds
/// the subscription handles it opens so that `unsubscribe` can close them,
/// and the feed handle so that a newly-requested RIC is actually registered
/// with the upstream rather than merely tracked locally.
pub struct DirectMarketDataService<F: UpstreamFeed> {
    cache: QuoteCache,
    feed: Arc<F>,
    ingest: Arc<IngestQueue>,
    handles: parking_lot::Mutex<HashMap<Ric, crate::quote_cache::SubscriptionHandle>>,
}

impl<F: UpstreamFeed> DirectMarketDataService<F> {
    pub fn new(cache: QuoteCache, feed: Arc<F>, ingest: Arc<IngestQueue>) -> Self {
        Self {
            cache,
            feed,
            ingest,
            handles: parking_lot::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<F: UpstreamFeed> MarketDataService for DirectMarketDataService<F> {
    fn get_latest(&self, rics: &[Ric]) -> HashMap<Ric, Quote> {
        self.cache.get_latest(rics)
    }

    async fn subscribe(&self, rics: &[Ric]) -> Result<SubscribeOutcome, ServiceError> {
        if rics.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "subscribe requires at least one RIC".into(),
            ));
        }
        let mut subscribed = Vec::with_capacity(rics.len());
        for ric in rics {
            if self.handles.lock().contains_key(ric) {
                subscribed.push(ric.clone());
                continue;
            }
            self.feed.register_client(ric.clone()).await?;
            let handle = self.cache.open_handle(ric.clone());
            self.handles.lock().insert(ric.clone(), handle);
            subscribed.push(ric.clone());
        }
        let total_subscriptions = self.handles.lock().len();
        Ok(SubscribeOutcome {
            subscribed,
            total_subscriptions,
            backpressure: self.ingest.utilization(),
        })
    }

    async fn unsubscribe(&self, rics: &[Ric]) -> UnsubscribeOutcome {
        let mut unsubscribed = Vec::with_capacity(rics.len());
        for ric in rics {
            let removed = self.handles.lock().remove(ric);
            if removed.is_some() {
                self.feed.unregister_client(ric).await;
                unsubscribed.push(ric.clone());
            }
        }
        let remaining_subscriptions = self.handles.lock().len();
        UnsubscribeOutcome { unsubscribed, remaining_subscriptions }
    }

    fn subscribed(&self) -> Vec<Ric> {
        self.handles.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::InMemoryUpstreamFeed;

    fn ric(s: &str) -> Ric {
        Ric::new(s).unwrap()
    }

    async fn connected_feed() -> Arc<InMemoryUpstreamFeed> {
        let feed = Arc::new(InMemoryUpstreamFeed::new(4));
        feed.connect().await.unwrap();
        feed
    }

    fn ingest_queue() -> Arc<IngestQueue> {
        Arc::new(IngestQueue::new(1000, 5000))
    }

    #[tokio::test]
    async fn subscribe_rejects_empty_ric_list() {
        let service = DirectMarketDataService::new(QuoteCache::new(), connected_feed().await, ingest_queue());
        let result = service.subscribe(&[]).await;
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn subscribe_then_subscribed_reports_ric() {
        let service = DirectMarketDataService::new(QuoteCache::new(), connected_feed().await, ingest_queue());
        let a = ric("A");
        service.subscribe(&[a.clone()]).await.unwrap();
        assert_eq!(service.subscribed(), vec![a]);
    }

    #[tokio::test]
    async fn subscribe_registers_new_ric_with_the_upstream_feed() {
        let feed = connected_feed().await;
        let service = DirectMarketDataService::new(QuoteCache::new(), feed.clone(), ingest_queue());
        let a = ric("A");
        service.subscribe(&[a.clone()]).await.unwrap();
        assert!(feed.is_registered(&a));
    }

    #[tokio::test]
    async fn subscribe_fails_with_feed_unavailable_when_feed_is_disconnected() {
        let feed = Arc::new(InMemoryUpstreamFeed::new(4));
        let service = DirectMarketDataService::new(QuoteCache::new(), feed, ingest_queue());
        let result = service.subscribe(&[ric("A")]).await;
        assert!(matches!(result, Err(ServiceError::FeedUnavailable)));
    }

    #[tokio::test]
    async fn subscribe_reports_total_subscriptions_and_backpressure() {
        let service = DirectMarketDataService::new(QuoteCache::new(), connected_feed().await, ingest_queue());
        let outcome = service.subscribe(&[ric("A"), ric("B")]).await.unwrap();
        assert_eq!(outcome.total_subscriptions, 2);
        assert_eq!(outcome.backpressure, 0.0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_handle_and_drops_cache_refcount() {
        let cache = QuoteCache::new();
        let feed = connected_feed().await;
        let service = DirectMarketDataService::new(cache.clone(), feed.clone(), ingest_queue());
        let a = ric("A");
        service.subscribe(&[a.clone()]).await.unwrap();
        assert_eq!(cache.refcount(&a), 1);

        let outcome = service.unsubscribe(&[a.clone()]).await;
        assert_eq!(outcome.unsubscribed, vec![a.clone()]);
        assert_eq!(outcome.remaining_subscriptions, 0);
        assert_eq!(cache.refcount(&a), 0);
        assert!(!feed.is_registered(&a));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_for_repeat_calls() {
        let cache = QuoteCache::new();
        let service = DirectMarketDataService::new(cache.clone(), connected_feed().await, ingest_queue());
        let a = ric("A");
        service.subscribe(&[a.clone()]).await.unwrap();
        service.subscribe(&[a.clone()]).await.unwrap();
        assert_eq!(cache.refcount(&a), 1);
    }
}
