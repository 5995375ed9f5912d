// =============================================================================
// MetricsSink — counters and a rolling quality score for DataQualityCore
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::ValidationResult;

#[derive(Debug, Default)]
pub struct MetricsSink {
    pub validations_total: AtomicU64,
    pub validations_clean: AtomicU64,
    pub errors_total: AtomicU64,
    pub warnings_total: AtomicU64,
}

impl MetricsSink {
    pub fn record(&self, result: &ValidationResult) {
        self.validations_total.fetch_add(1, Ordering::Relaxed);
        if result.is_valid() {
            self.validations_clean.fetch_add(1, Ordering::Relaxed);
        }
        self.errors_total
            .fetch_add(result.error_count() as u64, Ordering::Relaxed);
        self.warnings_total
            .fetch_add(result.warning_count() as u64, Ordering::Relaxed);
    }

    /// Percentage of all recorded validations with zero error-level issues,
    /// on a `[0.0, 100.0]` scale: `100 * clean / total`. Reports `100.0`
    /// when nothing has been validated yet, so a fresh service starts
    /// "healthy".
    pub fn overall_quality_score(&self) -> f64 {
        let total = self.validations_total.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let clean = self.validations_clean.load(Ordering::Relaxed);
        100.0 * clean as f64 / total as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            validations_total: self.validations_total.load(Ordering::Relaxed),
            validations_clean: self.validations_clean.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            warnings_total: self.warnings_total.load(Ordering::Relaxed),
            quality_score: self.overall_quality_score(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub validations_total: u64,
    pub validations_clean: u64,
    pub errors_total: u64,
    pub warnings_total: u64,
    pub quality_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dimension, Issue};
    use chrono::Utc;

    fn result(issues: Vec<Issue>) -> ValidationResult {
        ValidationResult {
            issues,
            validation_time: Utc::now(),
        }
    }

    #[test]
    fn fresh_sink_reports_perfect_score() {
        let sink = MetricsSink::default();
        assert_eq!(sink.overall_quality_score(), 100.0);
    }

    #[test]
    fn score_reflects_mix_of_clean_and_erroring_validations() {
        let sink = MetricsSink::default();
        sink.record(&result(vec![]));
        sink.record(&result(vec![Issue::error(Dimension::Validity, "bad")]));
        assert_eq!(sink.overall_quality_score(), 50.0);
    }

    #[test]
    fn warnings_do_not_affect_validity_count() {
        let sink = MetricsSink::default();
        sink.record(&result(vec![Issue::warning(Dimension::Timeliness, "stale")]));
        assert_eq!(sink.overall_quality_score(), 100.0);
        assert_eq!(sink.warnings_total.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
