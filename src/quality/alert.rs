// =============================================================================
// AlertService — throttled notification on data-quality errors
// =============================================================================
//
// Per-RIC throttling: at most one alert per `throttle_sec` window per RIC,
// so a sustained stream of bad quotes for the same instrument doesn't flood
// whatever is downstream of these log events.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use crate::types::{Ric, ValidationResult};

pub struct AlertService {
    throttle: chrono::Duration,
    enabled: bool,
    last_alerted: RwLock<HashMap<Ric, DateTime<Utc>>>,
    suppressed: RwLock<HashMap<Ric, u64>>,
}

impl AlertService {
    pub fn new(throttle_sec: i64, enabled: bool) -> Self {
        Self {
            throttle: chrono::Duration::seconds(throttle_sec),
            enabled,
            last_alerted: RwLock::new(HashMap::new()),
            suppressed: RwLock::new(HashMap::new()),
        }
    }

    /// Fire an alert for `ric` if one hasn't fired within the throttle
    /// window; otherwise bump the suppressed count for `ric` and return.
    /// Returns whether an alert was actually emitted.
    pub fn maybe_alert(&self, ric: &Ric, result: &ValidationResult) -> bool {
        if !self.enabled {
            return false;
        }

        let now = Utc::now();
        {
            let last_alerted = self.last_alerted.read();
            if let Some(last) = last_alerted.get(ric) {
                if now.signed_duration_since(*last) < self.throttle {
                    drop(last_alerted);
                    *self.suppressed.write().entry(ric.clone()).or_insert(0) += 1;
                    return false;
                }
            }
        }

        for issue in &result.issues {
            warn!(
                ric = %ric,
                level = ?issue.level,
                dimension = ?issue.dimension,
                message = %issue.message,
                "data quality alert"
            );
        }

        let suppressed = self.suppressed.write().remove(ric).unwrap_or(0);
        if suppressed > 0 {
            warn!(ric = %ric, suppressed, "suppressed alerts during throttle window");
        }

        self.last_alerted.write().insert(ric.clone(), now);
        true
    }
}
