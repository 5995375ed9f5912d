// =============================================================================
// DataQualityCore — L6: validator, metrics, issue tracker, throttled alerter
// =============================================================================

pub mod alert;
pub mod metrics;
pub mod tracker;
pub mod validator;

pub use alert::AlertService;
pub use metrics::MetricsSink;
pub use tracker::IssueTracker;
pub use validator::Validator;

use std::sync::Arc;

use crate::runtime_config::QualityConfig;
use crate::types::{Quote, ValidationResult};

/// Composition of the four quality pieces, wired so a single `validate` call
/// drives metrics recording, issue tracking, and throttled alerting.
pub struct DataQualityCore {
    validator: Validator,
    metrics: Arc<MetricsSink>,
    tracker: Arc<IssueTracker>,
    alerts: Arc<AlertService>,
    enabled: bool,
}

impl DataQualityCore {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            validator: Validator::new(config),
            metrics: Arc::new(MetricsSink::default()),
            tracker: Arc::new(IssueTracker::new(config.issues_per_ric, config.issues_global)),
            alerts: Arc::new(AlertService::new(config.alert_throttle_sec, config.alerting_enabled)),
            enabled: config.enabled,
        }
    }

    pub fn metrics(&self) -> Arc<MetricsSink> {
        self.metrics.clone()
    }

    pub fn tracker(&self) -> Arc<IssueTracker> {
        self.tracker.clone()
    }

    /// Validate `quote` against `previous` (if any), recording metrics and
    /// issue history, and firing a throttled alert if the result contains
    /// an error-level issue. Returns the `ValidationResult` so callers (e.g.
    /// the REST quality endpoints) can inspect it directly.
    pub fn validate(&self, quote: &Quote, previous: Option<&Quote>) -> ValidationResult {
        if !self.enabled {
            return ValidationResult {
                issues: Vec::new(),
                validation_time: chrono::Utc::now(),
            };
        }

        let result = self.validator.validate(quote, previous);
        self.metrics.record(&result);
        self.tracker.record(quote.ric.clone(), result.clone());
        if !result.is_valid() {
            self.alerts.maybe_alert(&quote.ric, &result);
        }
        result
    }

    /// Quality score for a RIC over its tracked issue history, on a
    /// `[0.0, 100.0]` scale: `100 * valid / (valid + invalid)`.
    pub fn quality_score(&self, ric: &crate::types::Ric) -> f64 {
        self.tracker.quality_score(ric)
    }

    pub fn is_healthy(&self, min_quality_score: f64) -> bool {
        self.metrics.overall_quality_score() >= min_quality_score
    }
}
