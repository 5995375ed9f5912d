// =============================================================================
// Validator — the five synchronous data-quality dimension checks
// =============================================================================
//
// Completeness: required fields present.
// Validity: fields within sane bounds (positive prices, within configured
//   min/max).
// Consistency: bid <= ask, spread within configured percentage.
// Timeliness: quote age within configured maximum.
// Accuracy: price fields do not carry more fractional digits than allowed,
//   checked exactly via `Decimal::scale()` (see SPEC_FULL.md's design-note
//   resolution for why this avoids float round-tripping artifacts).
// =============================================================================

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;

use crate::runtime_config::QualityConfig;
use crate::types::{Dimension, Issue, Quote, ValidationResult};

pub struct Validator {
    min_price: rust_decimal::Decimal,
    max_price: rust_decimal::Decimal,
    max_spread_pct: f64,
    max_age_sec: i64,
    max_decimal_places: u32,
}

impl Validator {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            min_price: config.min_price,
            max_price: config.max_price,
            max_spread_pct: config.max_spread_pct,
            max_age_sec: config.max_age_sec,
            max_decimal_places: config.max_decimal_places,
        }
    }

    pub fn validate(&self, quote: &Quote, previous: Option<&Quote>) -> ValidationResult {
        let mut issues = Vec::new();

        self.check_completeness(quote, &mut issues);
        self.check_validity(quote, &mut issues);
        self.check_consistency(quote, &mut issues);
        self.check_timeliness(quote, &mut issues);
        self.check_accuracy(quote, &mut issues);
        let _ = previous;

        ValidationResult {
            issues,
            validation_time: Utc::now(),
        }
    }

    /// ERROR if bid, ask, or last is missing (timestamp is non-optional on
    /// `Quote` and so can never itself be the missing field).
    fn check_completeness(&self, quote: &Quote, issues: &mut Vec<Issue>) {
        for (name, value) in [("bid", quote.bid), ("ask", quote.ask), ("last", quote.last)] {
            if value.is_none() {
                issues.push(Issue::error(Dimension::Completeness, format!("{name} is missing")));
            }
        }
    }

    // Negative volume has no check here: `Quote::volume` is `Option<u64>`,
    // so the type system rules it out by construction.
    fn check_validity(&self, quote: &Quote, issues: &mut Vec<Issue>) {
        for (name, value) in [("bid", quote.bid), ("ask", quote.ask), ("last", quote.last)] {
            if let Some(price) = value {
                if price <= rust_decimal::Decimal::ZERO {
                    issues.push(Issue::error(
                        Dimension::Validity,
                        format!("{name} is non-positive: {price}"),
                    ));
                } else if price < self.min_price || price > self.max_price {
                    issues.push(Issue::warning(
                        Dimension::Validity,
                        format!("{name} {price} outside bounds [{}, {}]", self.min_price, self.max_price),
                    ));
                }
            }
        }
    }

    fn check_consistency(&self, quote: &Quote, issues: &mut Vec<Issue>) {
        if let (Some(bid), Some(ask)) = (quote.bid, quote.ask) {
            if bid > ask {
                issues.push(Issue::error(
                    Dimension::Consistency,
                    format!("bid {bid} exceeds ask {ask}"),
                ));
            } else if bid > rust_decimal::Decimal::ZERO {
                let spread_pct = ((ask - bid) / bid * rust_decimal::Decimal::from(100))
                    .to_f64()
                    .unwrap_or(0.0);
                if spread_pct > self.max_spread_pct {
                    issues.push(Issue::warning(
                        Dimension::Consistency,
                        format!("spread {spread_pct:.4}% exceeds {}%", self.max_spread_pct),
                    ));
                }
            }
        }

        if let Some(last) = quote.last {
            if let Some(bid) = quote.bid {
                if last < bid {
                    issues.push(Issue::warning(
                        Dimension::Consistency,
                        format!("last {last} below bid {bid}"),
                    ));
                }
            }
            if let Some(ask) = quote.ask {
                if last > ask {
                    issues.push(Issue::warning(
                        Dimension::Consistency,
                        format!("last {last} above ask {ask}"),
                    ));
                }
            }
        }
    }

    fn check_timeliness(&self, quote: &Quote, issues: &mut Vec<Issue>) {
        let now = Utc::now();
        let age = now.signed_duration_since(quote.timestamp);
        if age.num_seconds() > self.max_age_sec {
            issues.push(Issue::warning(
                Dimension::Timeliness,
                format!("quote age {}s exceeds {}s", age.num_seconds(), self.max_age_sec),
            ));
        }
        if quote.timestamp > now {
            issues.push(Issue::warning(Dimension::Timeliness, "quote timestamp is in the future"));
        }
    }

    fn check_accuracy(&self, quote: &Quote, issues: &mut Vec<Issue>) {
        for (name, value) in [("bid", quote.bid), ("ask", quote.ask), ("last", quote.last)] {
            if let Some(price) = value {
                if price.scale() > self.max_decimal_places {
                    issues.push(Issue::warning(
                        Dimension::Accuracy,
                        format!(
                            "{name} has {} decimal places, exceeds {}",
                            price.scale(),
                            self.max_decimal_places
                        ),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ric;
    use rust_decimal_macros::dec;

    fn config() -> QualityConfig {
        QualityConfig::default()
    }

    fn base_quote() -> Quote {
        Quote::new(Ric::new("IBM.N").unwrap(), Utc::now())
    }

    #[test]
    fn empty_quote_fails_completeness() {
        let validator = Validator::new(&config());
        let result = validator.validate(&base_quote(), None);
        assert!(result
            .issues
            .iter()
            .any(|i| i.dimension == Dimension::Completeness));
    }

    #[test]
    fn negative_price_fails_validity() {
        let validator = Validator::new(&config());
        let mut quote = base_quote();
        quote.bid = Some(dec!(-1));
        let result = validator.validate(&quote, None);
        assert!(result.issues.iter().any(|i| i.dimension == Dimension::Validity));
    }

    #[test]
    fn bid_over_ask_fails_consistency() {
        let validator = Validator::new(&config());
        let mut quote = base_quote();
        quote.bid = Some(dec!(101));
        quote.ask = Some(dec!(100));
        let result = validator.validate(&quote, None);
        assert!(result.issues.iter().any(|i| i.dimension == Dimension::Consistency));
        assert!(!result.is_valid());
    }

    #[test]
    fn stale_quote_fails_timeliness() {
        let validator = Validator::new(&config());
        let mut quote = base_quote();
        quote.last = Some(dec!(100));
        quote.timestamp = Utc::now() - chrono::Duration::seconds(120);
        let result = validator.validate(&quote, None);
        assert!(result.issues.iter().any(|i| i.dimension == Dimension::Timeliness));
    }

    #[test]
    fn excess_decimal_places_fails_accuracy() {
        let validator = Validator::new(&config());
        let mut quote = base_quote();
        quote.last = Some(dec!(100.1234567));
        let result = validator.validate(&quote, None);
        assert!(result.issues.iter().any(|i| i.dimension == Dimension::Accuracy));
    }

    #[test]
    fn clean_quote_has_no_issues() {
        let validator = Validator::new(&config());
        let mut quote = base_quote();
        quote.bid = Some(dec!(100.00));
        quote.ask = Some(dec!(100.05));
        quote.last = Some(dec!(100.02));
        let result = validator.validate(&quote, None);
        assert!(result.is_valid());
        assert!(!result.has_issues() || result.warning_count() == result.issues.len());
    }

    #[test]
    fn last_outside_bid_ask_range_warns_consistency() {
        let validator = Validator::new(&config());
        let mut quote = base_quote();
        quote.bid = Some(dec!(100.00));
        quote.ask = Some(dec!(100.05));
        quote.last = Some(dec!(99.50));
        let result = validator.validate(&quote, None);
        assert!(result.issues.iter().any(|i| i.dimension == Dimension::Consistency));
        assert!(result.is_valid());
    }

    #[test]
    fn spread_percentage_is_measured_against_bid() {
        let mut config = config();
        config.max_spread_pct = 1.0;
        let validator = Validator::new(&config);
        let mut quote = base_quote();
        quote.bid = Some(dec!(100.00));
        quote.ask = Some(dec!(102.00));
        quote.last = Some(dec!(101.00));
        let result = validator.validate(&quote, None);
        assert!(result
            .issues
            .iter()
            .any(|i| i.dimension == Dimension::Consistency && i.message.contains("spread")));
    }

    #[test]
    fn future_timestamp_warns_timeliness() {
        let validator = Validator::new(&config());
        let mut quote = base_quote();
        quote.bid = Some(dec!(100));
        quote.ask = Some(dec!(100));
        quote.last = Some(dec!(100));
        quote.timestamp = Utc::now() + chrono::Duration::seconds(120);
        let result = validator.validate(&quote, None);
        assert!(result.issues.iter().any(|i| i.dimension == Dimension::Timeliness));
    }

    #[test]
    fn price_outside_configured_bounds_is_a_warning_not_an_error() {
        let validator = Validator::new(&config());
        let mut quote = base_quote();
        quote.bid = Some(dec!(0.00001));
        quote.ask = Some(dec!(0.00001));
        quote.last = Some(dec!(0.00001));
        let result = validator.validate(&quote, None);
        let validity_issues: Vec<_> = result
            .issues
            .iter()
            .filter(|i| i.dimension == Dimension::Validity)
            .collect();
        assert!(!validity_issues.is_empty());
        assert!(validity_issues.iter().all(|i| i.level == crate::types::IssueLevel::Warning));
    }
}
