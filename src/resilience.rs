// =============================================================================
// ResilienceGate — L4: rate limiter, circuit breaker, and retry wrapper
// =============================================================================
//
// Wraps a MarketDataService implementation with three layers, each of which
// can independently reject a call before it reaches the delegate:
// rate limiter (token bucket) -> circuit breaker (CLOSED/OPEN/HALF_OPEN) ->
// retry (bounded exponential backoff on transient errors only).
//
// The rate limiter's atomic-counter style follows `binance/rate_limit.rs`;
// the breaker's `RwLock<Inner>` state-machine style follows `risk.rs`, though
// the trip condition here is request-failure-rate rather than PnL-based.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::market_data_service::{MarketDataService, SubscribeOutcome, UnsubscribeOutcome};
use crate::runtime_config::ResilienceConfig;
use crate::types::{Quote, Ric};

// =============================================================================
// Rate limiter — token bucket
// =============================================================================

struct RateLimiter {
    capacity: u32,
    refill_per_sec: u32,
    acquire_timeout: Duration,
    tokens: AtomicU32,
    last_refill: RwLock<Instant>,
}

impl RateLimiter {
    fn new(capacity: u32, refill_per_sec: u32, acquire_timeout: Duration) -> Self {
        Self {
            capacity,
            refill_per_sec,
            acquire_timeout,
            tokens: AtomicU32::new(capacity),
            last_refill: RwLock::new(Instant::now()),
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.write();
        let elapsed = last.elapsed();
        if elapsed < Duration::from_millis(50) {
            return;
        }
        let grant = (elapsed.as_secs_f64() * self.refill_per_sec as f64) as u32;
        if grant > 0 {
            let current = self.tokens.load(Ordering::Relaxed);
            let next = (current + grant).min(self.capacity);
            self.tokens.store(next, Ordering::Relaxed);
            *last = Instant::now();
        }
    }

    /// Attempt to take one token without waiting. Returns `true` if
    /// permitted.
    fn try_acquire(&self) -> bool {
        self.refill();
        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Take a token, blocking (via short polling sleeps) up to
    /// `acquire_timeout` for the refill cycle to free one up. Returns
    /// `false` if the timeout elapses with no token granted.
    async fn acquire(&self) -> bool {
        if self.try_acquire() {
            return true;
        }
        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::time::sleep(remaining.min(Duration::from_millis(25))).await;
            if self.try_acquire() {
                return true;
            }
        }
    }
}

// =============================================================================
// Circuit breaker
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    outcomes: std::collections::VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_probes_remaining: u32,
}

struct CircuitBreaker {
    failure_threshold_pct: f64,
    window_size: usize,
    cooldown: Duration,
    half_open_probes: u32,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    fn new(failure_threshold_pct: f64, window_size: usize, cooldown_ms: u64, half_open_probes: u32) -> Self {
        Self {
            failure_threshold_pct,
            window_size,
            cooldown: Duration::from_millis(cooldown_ms),
            half_open_probes,
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                outcomes: std::collections::VecDeque::with_capacity(window_size),
                opened_at: None,
                half_open_probes_remaining: 0,
            }),
        }
    }

    /// Whether a call is currently permitted, transitioning OPEN -> HALF_OPEN
    /// once the cooldown has elapsed.
    fn permit(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => inner.half_open_probes_remaining > 0,
            BreakerState::Open => {
                if let Some(opened_at) = inner.opened_at {
                    if opened_at.elapsed() >= self.cooldown {
                        inner.state = BreakerState::HalfOpen;
                        inner.half_open_probes_remaining = self.half_open_probes;
                        return inner.half_open_probes_remaining > 0;
                    }
                }
                false
            }
        }
    }

    fn record(&self, success: bool) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_probes_remaining = inner.half_open_probes_remaining.saturating_sub(1);
                if success {
                    if inner.half_open_probes_remaining == 0 {
                        inner.state = BreakerState::Closed;
                        inner.outcomes.clear();
                    }
                } else {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.outcomes.clear();
                }
            }
            BreakerState::Closed => {
                if inner.outcomes.len() == self.window_size {
                    inner.outcomes.pop_front();
                }
                inner.outcomes.push_back(success);
                if inner.outcomes.len() == self.window_size {
                    let failures = inner.outcomes.iter().filter(|s| !**s).count();
                    let failure_pct = (failures as f64 / self.window_size as f64) * 100.0;
                    if failure_pct >= self.failure_threshold_pct {
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(Instant::now());
                        inner.outcomes.clear();
                    }
                }
            }
            BreakerState::Open => {}
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.inner.read().state, BreakerState::Open)
    }
}

// =============================================================================
// ResilienceGate
// =============================================================================

#[derive(Debug, Default)]
pub struct ResilienceMetrics {
    pub rate_limited: AtomicU64,
    pub circuit_rejected: AtomicU64,
    pub retries_attempted: AtomicU64,
    pub calls_failed: AtomicU64,
}

/// Wraps a `MarketDataService` delegate with rate limiting, circuit
/// breaking, and bounded retry of transient failures.
pub struct ResilienceGate<S: MarketDataService> {
    delegate: S,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    metrics: ResilienceMetrics,
}

impl<S: MarketDataService> ResilienceGate<S> {
    pub fn new(delegate: S, config: &ResilienceConfig) -> Self {
        Self {
            delegate,
            limiter: RateLimiter::new(
                config.rate_limit.capacity,
                config.rate_limit.refill_per_sec,
                Duration::from_millis(config.rate_limit.acquire_timeout_ms),
            ),
            breaker: CircuitBreaker::new(
                config.circuit_breaker.failure_threshold_pct,
                config.circuit_breaker.window_size,
                config.circuit_breaker.cooldown_ms,
                config.circuit_breaker.half_open_probes,
            ),
            max_attempts: config.retry.max_attempts,
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            metrics: ResilienceMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ResilienceMetrics {
        &self.metrics
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        scaled.min(self.max_delay)
    }

    /// Run `Subscribe` through rate limiting, circuit breaking, and retry.
    /// The delegate call is re-issued on each retry attempt, so it must be
    /// idempotent — `DirectMarketDataService::subscribe` is, since an
    /// already-open handle short-circuits before touching the feed.
    async fn guarded_subscribe(&self, rics: &[Ric]) -> Result<SubscribeOutcome, ServiceError> {
        if !self.limiter.acquire().await {
            self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
            return Err(ServiceError::RateLimited);
        }

        if !self.breaker.permit() {
            self.metrics.circuit_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(ServiceError::CircuitOpen);
        }

        let mut attempt = 0;
        loop {
            match self.delegate.subscribe(rics).await {
                Ok(value) => {
                    self.breaker.record(true);
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    self.breaker.record(false);
                    self.metrics.retries_attempted.fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff_delay(attempt);
                    debug!(attempt, ?delay, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.breaker.record(false);
                    self.metrics.calls_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "resilience gate call failed");
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl<S: MarketDataService> MarketDataService for ResilienceGate<S> {
    fn get_latest(&self, rics: &[Ric]) -> HashMap<Ric, Quote> {
        // Cache reads never fail and are not rate-limited or circuit-guarded:
        // they never touch the upstream feed.
        self.delegate.get_latest(rics)
    }

    async fn subscribe(&self, rics: &[Ric]) -> Result<SubscribeOutcome, ServiceError> {
        self.guarded_subscribe(rics).await
    }

    async fn unsubscribe(&self, rics: &[Ric]) -> UnsubscribeOutcome {
        self.delegate.unsubscribe(rics).await
    }

    fn subscribed(&self) -> Vec<Ric> {
        self.delegate.subscribed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestQueue;
    use crate::market_data_service::DirectMarketDataService;
    use crate::quote_cache::QuoteCache;
    use crate::upstream::InMemoryUpstreamFeed;
    use std::sync::Arc;

    fn config() -> ResilienceConfig {
        ResilienceConfig::default()
    }

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

    #[test]
    fn rate_limiter_rejects_once_capacity_exhausted() {
        let limiter = RateLimiter::new(2, 1, Duration::from_millis(500));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn rate_limiter_acquire_waits_for_refill_within_timeout() {
        let limiter = RateLimiter::new(1, 20, Duration::from_millis(200));
        assert!(limiter.acquire().await);
        assert!(limiter.acquire().await, "should wait out the refill cycle");
    }

    #[tokio::test]
    async fn rate_limiter_acquire_times_out_when_starved() {
        let limiter = RateLimiter::new(1, 0, Duration::from_millis(50));
        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
    }

    #[test]
    fn circuit_breaker_opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(50.0, 4, 10_000, 1);
        assert!(breaker.permit());
        breaker.record(false);
        breaker.record(false);
        breaker.record(true);
        breaker.record(true);
        assert!(!breaker.is_open());

        breaker.record(false);
        breaker.record(false);
        breaker.record(false);
        breaker.record(false);
        assert!(breaker.is_open());
        assert!(!breaker.permit());
    }

    #[tokio::test]
    async fn gate_passes_through_successful_subscribe() {
        let gate = ResilienceGate::new(
            DirectMarketDataService::new(QuoteCache::new(), connected_feed().await, ingest_queue()),
            &config(),
        );
        let outcome = gate.subscribe(&[ric("A")]).await.unwrap();
        assert_eq!(outcome.subscribed, vec![ric("A")]);
    }

    #[tokio::test]
    async fn gate_rejects_invalid_argument_without_retry() {
        let gate = ResilienceGate::new(
            DirectMarketDataService::new(QuoteCache::new(), connected_feed().await, ingest_queue()),
            &config(),
        );
        let result = gate.subscribe(&[]).await;
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
        assert_eq!(gate.metrics().retries_attempted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn gate_retries_transient_feed_unavailable_then_succeeds() {
        let feed = Arc::new(InMemoryUpstreamFeed::new(4));
        let gate = ResilienceGate::new(DirectMarketDataService::new(QuoteCache::new(), feed.clone(), ingest_queue()), &config());

        let feed_clone = feed.clone();
        let connect_after_delay = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            feed_clone.connect().await.unwrap();
        });

        let outcome = gate.subscribe(&[ric("A")]).await.unwrap();
        assert_eq!(outcome.subscribed, vec![ric("A")]);
        assert!(gate.metrics().retries_attempted.load(Ordering::Relaxed) >= 1);
        connect_after_delay.await.unwrap();
    }
}
