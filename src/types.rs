// =============================================================================
// Core data model — RIC, Quote, ApplyTask, validation results
// =============================================================================
//
// Every type here is immutable once constructed (Quote, ValidationResult,
// IssueRecord) or a cheap-to-clone opaque handle (Ric). No component outside
// QuoteCache mutates the latest-quote mapping; these types just carry values
// between layers.
// =============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// RIC — Reservoir Instrument Code
// =============================================================================

/// Opaque, case-sensitive instrument identifier. Cheap to clone (an `Arc<str>`
/// under the hood) so it can be passed across the ingest/fan-out/quality
/// paths on every update without per-update heap churn.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ric(Arc<str>);

impl Ric {
    /// Construct a `Ric`, rejecting the empty string.
    pub fn new(value: impl AsRef<str>) -> Result<Self, InvalidRic> {
        let value = value.as_ref();
        if value.is_empty() {
            return Err(InvalidRic);
        }
        Ok(Self(Arc::from(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Returned when a RIC is constructed from an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("RIC must be a non-empty string")]
pub struct InvalidRic;

impl fmt::Display for Ric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Ric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ric({:?})", self.0)
    }
}

impl TryFrom<&str> for Ric {
    type Error = InvalidRic;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ric::new(value)
    }
}

impl TryFrom<String> for Ric {
    type Error = InvalidRic;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ric::new(value)
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Immutable snapshot of an instrument at a point in time. Replaced, never
/// mutated, by subsequent updates for the same RIC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ric: Ric,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn new(ric: Ric, timestamp: DateTime<Utc>) -> Self {
        Self {
            ric,
            bid: None,
            ask: None,
            last: None,
            volume: None,
            timestamp,
        }
    }
}

// =============================================================================
// ApplyTask — bounded-lifetime ingest work item
// =============================================================================

/// A pending cache write. `enqueued_at` is measured with [`Instant`] so
/// staleness checks are immune to wall-clock jumps.
#[derive(Debug, Clone)]
pub struct ApplyTask {
    pub ric: Ric,
    pub quote: Quote,
    pub enqueued_at: Instant,
}

impl ApplyTask {
    pub fn new(ric: Ric, quote: Quote) -> Self {
        Self {
            ric,
            quote,
            enqueued_at: Instant::now(),
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.enqueued_at.elapsed()
    }
}

// =============================================================================
// Data-quality types
// =============================================================================

/// Severity of a single validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueLevel {
    Error,
    Warning,
}

/// One of the five data-quality axes (plus `System`, for validator failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Dimension {
    Completeness,
    Validity,
    Consistency,
    Timeliness,
    Accuracy,
    System,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Completeness,
        Dimension::Validity,
        Dimension::Consistency,
        Dimension::Timeliness,
        Dimension::Accuracy,
        Dimension::System,
    ];
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dimension::Completeness => "completeness",
            Dimension::Validity => "validity",
            Dimension::Consistency => "consistency",
            Dimension::Timeliness => "timeliness",
            Dimension::Accuracy => "accuracy",
            Dimension::System => "system",
        };
        f.write_str(s)
    }
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub level: IssueLevel,
    pub dimension: Dimension,
    pub message: String,
}

impl Issue {
    pub fn error(dimension: Dimension, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            dimension,
            message: message.into(),
        }
    }

    pub fn warning(dimension: Dimension, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            dimension,
            message: message.into(),
        }
    }
}

/// Outcome of validating one quote. Side-effect-free to produce; the caller
/// decides what to do with it (metrics, issue recording, alerting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub issues: Vec<Issue>,
    pub validation_time: DateTime<Utc>,
}

impl ValidationResult {
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.level == IssueLevel::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.level == IssueLevel::Warning)
            .count()
    }

    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// A validation outcome retained in the issue tracker's ring buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub ric: Ric,
    pub result: ValidationResult,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Stream subscriber state
// =============================================================================

/// Lifecycle state of a live outbound push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriberState {
    Active,
    Closing,
    Closed,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ric_rejects_empty() {
        assert!(Ric::new("").is_err());
    }

    #[test]
    fn ric_accepts_nonempty_and_displays() {
        let r = Ric::new("IBM.N").unwrap();
        assert_eq!(r.as_str(), "IBM.N");
        assert_eq!(format!("{r}"), "IBM.N");
    }

    #[test]
    fn ric_equality_by_value() {
        let a = Ric::new("IBM.N").unwrap();
        let b = Ric::new("IBM.N").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn validation_result_counts_and_validity() {
        let r = ValidationResult {
            issues: vec![
                Issue::warning(Dimension::Timeliness, "stale"),
                Issue::error(Dimension::Consistency, "bid > ask"),
            ],
            validation_time: Utc::now(),
        };
        assert_eq!(r.error_count(), 1);
        assert_eq!(r.warning_count(), 1);
        assert!(!r.is_valid());
    }

    #[test]
    fn validation_result_with_no_errors_is_valid() {
        let r = ValidationResult {
            issues: vec![],
            validation_time: Utc::now(),
        };
        assert!(r.is_valid());
    }

    #[test]
    fn apply_task_age_grows() {
        let ric = Ric::new("A").unwrap();
        let quote = Quote::new(ric.clone(), Utc::now());
        let task = ApplyTask::new(ric, quote);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(task.age() >= std::time::Duration::from_millis(5));
    }
}
