// =============================================================================
// AppState — composition root wiring L1-L7 behind a single Arc
// =============================================================================
//
// Every subsystem is constructed once at startup and handed out as a shared
// reference. The REST and WebSocket transports only ever see this type; none
// of them reach into individual layers directly.
// =============================================================================

use std::sync::Arc;

use crate::errors::ServiceError;
use crate::fanout::StreamFanout;
use crate::market_data_service::{DirectMarketDataService, MarketDataService, SubscribeOutcome, UnsubscribeOutcome};
use crate::quality::DataQualityCore;
use crate::resilience::ResilienceGate;
use crate::runtime_config::RuntimeConfig;
use crate::supervisor::LifecycleSupervisor;
use crate::types::{IssueRecord, Quote, Ric};
use crate::upstream::UpstreamFeed;

/// Central shared state for the running service, generic over the upstream
/// feed implementation so tests can wire a synthetic feed and production
/// wires the reference WebSocket implementation.
pub struct AppState<F: UpstreamFeed + 'static> {
    pub config: RuntimeConfig,
    pub supervisor: LifecycleSupervisor<F>,
    pub service: ResilienceGate<DirectMarketDataService<F>>,
    pub fanout: Arc<StreamFanout>,
    pub quality: Arc<DataQualityCore>,
}

impl<F: UpstreamFeed + 'static> AppState<F> {
    pub fn new(feed: Arc<F>, config: RuntimeConfig) -> Self {
        let supervisor = LifecycleSupervisor::new(feed.clone(), &config);
        let direct = DirectMarketDataService::new(supervisor.cache.clone(), feed, supervisor.ingest.clone());
        let service = ResilienceGate::new(direct, &config.resilience);
        let fanout = supervisor.fanout.clone();
        let quality = supervisor.quality.clone();

        Self {
            config,
            supervisor,
            service,
            fanout,
            quality,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.supervisor.start(self.config.ingest.worker_count).await
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    pub fn get_latest(&self, rics: &[Ric]) -> std::collections::HashMap<Ric, Quote> {
        self.service.get_latest(rics)
    }

    pub async fn subscribe(&self, rics: &[Ric]) -> Result<SubscribeOutcome, ServiceError> {
        self.service.subscribe(rics).await
    }

    pub async fn unsubscribe(&self, rics: &[Ric]) -> UnsubscribeOutcome {
        self.service.unsubscribe(rics).await
    }

    pub fn subscribed(&self) -> Vec<Ric> {
        self.service.subscribed()
    }

    pub fn quality_score(&self, ric: &Ric) -> f64 {
        self.quality.quality_score(ric)
    }

    pub fn quality_issues(&self, ric: &Ric, hours: i64) -> Vec<IssueRecord> {
        self.supervisor.quality.tracker().issues_for(ric, hours)
    }

    pub fn is_healthy(&self) -> bool {
        self.quality.is_healthy(self.config.quality.min_quality_score)
    }

    pub fn min_quality_score(&self) -> f64 {
        self.config.quality.min_quality_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::InMemoryUpstreamFeed;

    #[tokio::test]
    async fn app_state_wires_subscribe_through_to_cache() {
        let feed = Arc::new(InMemoryUpstreamFeed::new(16));
        feed.connect().await.unwrap();
        let state = AppState::new(feed, RuntimeConfig::default());
        let ric = Ric::new("IBM.N").unwrap();
        state.subscribe(&[ric.clone()]).await.unwrap();
        assert!(state.subscribed().contains(&ric));
    }

    #[tokio::test]
    async fn app_state_reports_healthy_before_any_validation() {
        let feed = Arc::new(InMemoryUpstreamFeed::new(16));
        let state = AppState::new(feed, RuntimeConfig::default());
        assert!(state.is_healthy());
    }
}
