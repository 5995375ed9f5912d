// =============================================================================
// Runtime Configuration — hot-loadable service settings with atomic save
// =============================================================================
//
// Every tunable lives here so the service can be reconfigured by editing a
// JSON file and restarting, without touching code. Persistence uses an
// atomic tmp + rename pattern to prevent corruption on crash. All fields
// carry `#[serde(default = "...")]` so that adding new fields never breaks
// loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers
// =============================================================================

fn default_upstream_host() -> String {
    "localhost".to_string()
}

fn default_upstream_port() -> u16 {
    14002
}

fn default_upstream_service() -> String {
    "ELEKTRON_DD".to_string()
}

fn default_upstream_user() -> String {
    "reservoir".to_string()
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_worker_count() -> usize {
    5
}

fn default_task_staleness_ms() -> u64 {
    5000
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_subscriber_queue_capacity() -> usize {
    256
}

fn default_slow_consumer_timeout_ms() -> u64 {
    5000
}

fn default_rate_limit_capacity() -> u32 {
    200
}

fn default_rate_limit_refill_per_sec() -> u32 {
    200
}

fn default_rate_limit_acquire_timeout_ms() -> u64 {
    500
}

fn default_cb_failure_threshold_pct() -> f64 {
    50.0
}

fn default_cb_window_size() -> usize {
    20
}

fn default_cb_cooldown_ms() -> u64 {
    30_000
}

fn default_cb_half_open_probes() -> u32 {
    3
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_min_price() -> Decimal {
    dec!(0.01)
}

fn default_max_price() -> Decimal {
    dec!(1000000)
}

fn default_max_spread_pct() -> f64 {
    10.0
}

fn default_max_age_sec() -> i64 {
    60
}

fn default_max_decimal_places() -> u32 {
    6
}

fn default_min_quality_score() -> f64 {
    95.0
}

fn default_alert_throttle_sec() -> i64 {
    60
}

fn default_issues_per_ric() -> usize {
    100
}

fn default_issues_global() -> usize {
    10000
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_total_budget_sec() -> u64 {
    30
}

// =============================================================================
// Nested config sections
// =============================================================================

/// Upstream feed connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_host")]
    pub host: String,
    #[serde(default = "default_upstream_port")]
    pub port: u16,
    #[serde(default = "default_upstream_service")]
    pub service: String,
    #[serde(default = "default_upstream_user")]
    pub user: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            port: default_upstream_port(),
            service: default_upstream_service(),
            user: default_upstream_user(),
        }
    }
}

/// Ingest queue sizing and worker pool parameters (L2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_task_staleness_ms")]
    pub task_staleness_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            task_staleness_ms: default_task_staleness_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Per-subscriber fan-out queue parameters (L5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
    #[serde(default = "default_slow_consumer_timeout_ms")]
    pub slow_consumer_timeout_ms: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            slow_consumer_timeout_ms: default_slow_consumer_timeout_ms(),
        }
    }
}

/// Token-bucket rate limiter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_capacity")]
    pub capacity: u32,
    #[serde(default = "default_rate_limit_refill_per_sec")]
    pub refill_per_sec: u32,
    /// How long `acquire` blocks hoping for a token to free up before
    /// raising `RateLimited`.
    #[serde(default = "default_rate_limit_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_rate_limit_capacity(),
            refill_per_sec: default_rate_limit_refill_per_sec(),
            acquire_timeout_ms: default_rate_limit_acquire_timeout_ms(),
        }
    }
}

/// Circuit breaker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_cb_failure_threshold_pct")]
    pub failure_threshold_pct: f64,
    #[serde(default = "default_cb_window_size")]
    pub window_size: usize,
    #[serde(default = "default_cb_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_cb_half_open_probes")]
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold_pct: default_cb_failure_threshold_pct(),
            window_size: default_cb_window_size(),
            cooldown_ms: default_cb_cooldown_ms(),
            half_open_probes: default_cb_half_open_probes(),
        }
    }
}

/// Retry wrapper parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

/// Resilience gate parameters (L4) — rate limiter, circuit breaker, retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Data quality validation and alerting parameters (L6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub alerting_enabled: bool,
    #[serde(default = "default_min_price")]
    pub min_price: Decimal,
    #[serde(default = "default_max_price")]
    pub max_price: Decimal,
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: f64,
    #[serde(default = "default_max_age_sec")]
    pub max_age_sec: i64,
    #[serde(default = "default_max_decimal_places")]
    pub max_decimal_places: u32,
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: f64,
    #[serde(default = "default_alert_throttle_sec")]
    pub alert_throttle_sec: i64,
    #[serde(default = "default_issues_per_ric")]
    pub issues_per_ric: usize,
    #[serde(default = "default_issues_global")]
    pub issues_global: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alerting_enabled: true,
            min_price: default_min_price(),
            max_price: default_max_price(),
            max_spread_pct: default_max_spread_pct(),
            max_age_sec: default_max_age_sec(),
            max_decimal_places: default_max_decimal_places(),
            min_quality_score: default_min_quality_score(),
            alert_throttle_sec: default_alert_throttle_sec(),
            issues_per_ric: default_issues_per_ric(),
            issues_global: default_issues_global(),
        }
    }
}

/// Shutdown sequencing parameters (L7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_total_budget_sec")]
    pub total_budget_sec: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
            total_budget_sec: default_total_budget_sec(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the market data service.
///
/// Every field has a serde default so older JSON config files missing newer
/// fields still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            ingest: IngestConfig::default(),
            fanout: FanoutConfig::default(),
            resilience: ResilienceConfig::default(),
            quality: QualityConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            upstream_host = %config.upstream.host,
            upstream_port = config.upstream.port,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialize runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.upstream.host, "localhost");
        assert_eq!(cfg.upstream.port, 14002);
        assert_eq!(cfg.ingest.queue_capacity, 1000);
        assert_eq!(cfg.ingest.worker_count, 5);
        assert_eq!(cfg.fanout.subscriber_queue_capacity, 256);
        assert_eq!(cfg.resilience.rate_limit.capacity, 200);
        assert_eq!(cfg.resilience.circuit_breaker.window_size, 20);
        assert!(cfg.quality.enabled);
        assert_eq!(cfg.quality.max_decimal_places, 6);
        assert_eq!(cfg.shutdown.total_budget_sec, 30);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.upstream.host, "localhost");
        assert_eq!(cfg.ingest.worker_count, 5);
        assert!(cfg.quality.alerting_enabled);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "upstream": { "host": "feedserver.internal" } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.upstream.host, "feedserver.internal");
        assert_eq!(cfg.upstream.port, 14002);
        assert_eq!(cfg.ingest.queue_capacity, 1000);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.upstream.host, cfg2.upstream.host);
        assert_eq!(cfg.quality.min_price, cfg2.quality.min_price);
        assert_eq!(cfg.shutdown.drain_timeout_ms, cfg2.shutdown.drain_timeout_ms);
    }

    #[test]
    fn save_and_load_roundtrip_via_tempfile() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("reservoir_cfg_test_{:?}.json", std::thread::current().id()));
        let cfg = RuntimeConfig::default();
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.upstream.host, cfg.upstream.host);
        std::fs::remove_file(&path).ok();
    }
}
