// =============================================================================
// IssueTracker — bounded per-RIC and global issue history
// =============================================================================
//
// Two ring buffers: one per RIC (capped at `per_ric_capacity`) and one global
// (capped at `global_capacity`), both trimmed from the front on overflow —
// the same ring-trim-to-capacity discipline `candle_buffer.rs` uses for its
// per-key `VecDeque`s.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;

use crate::types::{Dimension, IssueRecord, Ric, ValidationResult};

pub struct IssueTracker {
    per_ric: RwLock<HashMap<Ric, VecDeque<IssueRecord>>>,
    global: RwLock<VecDeque<IssueRecord>>,
    per_ric_capacity: usize,
    global_capacity: usize,
}

impl IssueTracker {
    pub fn new(per_ric_capacity: usize, global_capacity: usize) -> Self {
        Self {
            per_ric: RwLock::new(HashMap::new()),
            global: RwLock::new(VecDeque::with_capacity(global_capacity.min(1024))),
            per_ric_capacity,
            global_capacity,
        }
    }

    pub fn record(&self, ric: Ric, result: ValidationResult) {
        let record = IssueRecord {
            ric: ric.clone(),
            result,
            recorded_at: Utc::now(),
        };

        {
            let mut per_ric = self.per_ric.write();
            let ring = per_ric.entry(ric).or_default();
            ring.push_back(record.clone());
            while ring.len() > self.per_ric_capacity {
                ring.pop_front();
            }
        }

        {
            let mut global = self.global.write();
            global.push_back(record);
            while global.len() > self.global_capacity {
                global.pop_front();
            }
        }
    }

    /// Issues recorded for `ric` within the last `hours`.
    pub fn issues_for(&self, ric: &Ric, hours: i64) -> Vec<IssueRecord> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        self.per_ric
            .read()
            .get(ric)
            .map(|ring| {
                ring.iter()
                    .filter(|r| r.recorded_at >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Quality score for a RIC, on a `[0.0, 100.0]` scale:
    /// `100 * valid / (valid + invalid)` over its tracked history. `100.0`
    /// if nothing has been tracked for it yet.
    pub fn quality_score(&self, ric: &Ric) -> f64 {
        let per_ric = self.per_ric.read();
        match per_ric.get(ric) {
            None => 100.0,
            Some(ring) if ring.is_empty() => 100.0,
            Some(ring) => {
                let clean = ring.iter().filter(|r| r.result.is_valid()).count();
                100.0 * clean as f64 / ring.len() as f64
            }
        }
    }

    /// Periodic trim pass dropping records older than `max_age_hours` from
    /// every ring. Intended to be driven by a reaper task on its own
    /// cancellation token, the same way the subscription cleaner in the
    /// signet-sdk reference drives its own retain loop.
    pub fn trim_older_than(&self, max_age_hours: i64) {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);

        let mut per_ric = self.per_ric.write();
        per_ric.retain(|_, ring| {
            ring.retain(|r| r.recorded_at >= cutoff);
            !ring.is_empty()
        });

        let mut global = self.global.write();
        global.retain(|r| r.recorded_at >= cutoff);
    }

    pub fn global_len(&self) -> usize {
        self.global.read().len()
    }

    /// RICs ranked by issue count over the last hour, most first, capped at
    /// `limit`.
    pub fn top_offenders(&self, limit: usize) -> Vec<(Ric, usize)> {
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let mut counts: HashMap<Ric, usize> = HashMap::new();
        for record in self.global.read().iter() {
            if record.recorded_at >= cutoff {
                *counts.entry(record.ric.clone()).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(Ric, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }

    /// Issue counts per dimension over the last hour, across every RIC.
    pub fn breakdown(&self) -> HashMap<Dimension, usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let mut counts: HashMap<Dimension, usize> = HashMap::new();
        for record in self.global.read().iter() {
            if record.recorded_at < cutoff {
                continue;
            }
            for issue in &record.result.issues {
                *counts.entry(issue.dimension).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Clear tracked history for `ric`, or for every RIC (and the global
    /// ring) when `ric` is `None`.
    pub fn clear(&self, ric: Option<&Ric>) {
        match ric {
            Some(ric) => {
                self.per_ric.write().remove(ric);
                self.global.write().retain(|r| &r.ric != ric);
            }
            None => {
                self.per_ric.write().clear();
                self.global.write().clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dimension, Issue};

    fn ric(s: &str) -> Ric {
        Ric::new(s).unwrap()
    }

    fn clean_result() -> ValidationResult {
        ValidationResult {
            issues: vec![],
            validation_time: Utc::now(),
        }
    }

    fn error_result() -> ValidationResult {
        ValidationResult {
            issues: vec![Issue::error(Dimension::Validity, "bad")],
            validation_time: Utc::now(),
        }
    }

    #[test]
    fn per_ric_ring_trims_to_capacity() {
        let tracker = IssueTracker::new(2, 100);
        let a = ric("A");
        tracker.record(a.clone(), clean_result());
        tracker.record(a.clone(), clean_result());
        tracker.record(a.clone(), clean_result());
        assert_eq!(tracker.issues_for(&a, 24).len(), 2);
    }

    #[test]
    fn quality_score_reflects_error_ratio() {
        let tracker = IssueTracker::new(10, 100);
        let a = ric("A");
        tracker.record(a.clone(), clean_result());
        tracker.record(a.clone(), error_result());
        assert_eq!(tracker.quality_score(&a), 50.0);
    }

    #[test]
    fn untracked_ric_reports_perfect_score() {
        let tracker = IssueTracker::new(10, 100);
        assert_eq!(tracker.quality_score(&ric("UNKNOWN")), 100.0);
    }

    #[test]
    fn global_ring_also_trims_to_capacity() {
        let tracker = IssueTracker::new(100, 1);
        tracker.record(ric("A"), clean_result());
        tracker.record(ric("B"), clean_result());
        assert_eq!(tracker.global_len(), 1);
    }

    #[test]
    fn top_offenders_ranks_by_recent_issue_count() {
        let tracker = IssueTracker::new(100, 100);
        tracker.record(ric("A"), error_result());
        tracker.record(ric("A"), error_result());
        tracker.record(ric("B"), error_result());
        let top = tracker.top_offenders(2);
        assert_eq!(top[0].0, ric("A"));
        assert_eq!(top[0].1, 2);
        assert_eq!(top[1].0, ric("B"));
    }

    #[test]
    fn breakdown_counts_issues_per_dimension() {
        let tracker = IssueTracker::new(100, 100);
        tracker.record(ric("A"), error_result());
        tracker.record(ric("B"), error_result());
        let breakdown = tracker.breakdown();
        assert_eq!(breakdown.get(&Dimension::Validity), Some(&2));
    }

    #[test]
    fn clear_one_ric_leaves_others_intact() {
        let tracker = IssueTracker::new(100, 100);
        tracker.record(ric("A"), clean_result());
        tracker.record(ric("B"), clean_result());
        tracker.clear(Some(&ric("A")));
        assert_eq!(tracker.quality_score(&ric("A")), 100.0);
        assert_eq!(tracker.issues_for(&ric("A"), 24).len(), 0);
        assert_eq!(tracker.issues_for(&ric("B"), 24).len(), 1);
    }

    #[test]
    fn clear_all_empties_every_ring() {
        let tracker = IssueTracker::new(100, 100);
        tracker.record(ric("A"), clean_result());
        tracker.record(ric("B"), clean_result());
        tracker.clear(None);
        assert_eq!(tracker.global_len(), 0);
        assert_eq!(tracker.issues_for(&ric("A"), 24).len(), 0);
    }
}
