//! Backoff tracker: per-job `prevFailed`/`previousRequeues` state feeding
//! the second trip condition in `job::check_limits` (§4.E step 7).
//!
//! Grounded on the same `Mutex<HashMap<String, _>>` per-job cache shape as
//! [`crate::expectations::Expectations`], applied to a different bucket.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct Record {
    prev_failed: u32,
    previous_requeues: u32,
}

#[derive(Default)]
pub struct BackoffTracker {
    records: Mutex<HashMap<String, Record>>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more requeue for `job_key` and returns the
    /// `(prev_failed, previous_requeues)` pair as it stood *before* this
    /// tick, for `second_disjunct_trips` to compare against the freshly
    /// observed failed count.
    pub fn requeue(&self, job_key: &str) -> (u32, u32) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(job_key.to_string()).or_default();
        let prior = (record.prev_failed, record.previous_requeues);
        record.previous_requeues += 1;
        prior
    }

    /// Updates the stored `prevFailed` for `job_key` to this tick's
    /// observed failed count, for comparison on the next tick.
    pub fn record_failed(&self, job_key: &str, failed: u32) {
        let mut records = self.records.lock().unwrap();
        records.entry(job_key.to_string()).or_default().prev_failed = failed;
    }

    /// Drops all state for `job_key` on terminal cleanup or job deletion.
    pub fn forget(&self, job_key: &str) {
        self.records.lock().unwrap().remove(job_key);
    }
}

/// Pure second-disjunct check (§4.E step 7): trips when failures grew since
/// the last tick, the job isn't fully active, and one more requeue would
/// exceed the backoff budget.
pub fn second_disjunct_trips(
    failed: u32,
    prev_failed: u32,
    active: u32,
    total_replicas: u32,
    previous_requeues: u32,
    backoff_limit: u32,
) -> bool {
    failed > prev_failed && active != total_replicas && previous_requeues + 1 > backoff_limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_when_failures_grew_and_budget_exhausted() {
        assert!(second_disjunct_trips(2, 1, 1, 3, 1, 1));
    }

    #[test]
    fn does_not_trip_when_failed_count_unchanged() {
        assert!(!second_disjunct_trips(1, 1, 1, 3, 1, 1));
    }

    #[test]
    fn does_not_trip_when_all_replicas_are_active() {
        assert!(!second_disjunct_trips(2, 1, 3, 3, 1, 1));
    }

    #[test]
    fn does_not_trip_while_requeues_remain_within_budget() {
        assert!(!second_disjunct_trips(2, 1, 1, 3, 0, 5));
    }

    #[test]
    fn requeue_returns_prior_state_then_increments() {
        let tracker = BackoffTracker::new();
        tracker.record_failed("ns/job", 1);
        let (prev_failed, previous_requeues) = tracker.requeue("ns/job");
        assert_eq!((prev_failed, previous_requeues), (1, 0));
        let (prev_failed, previous_requeues) = tracker.requeue("ns/job");
        assert_eq!((prev_failed, previous_requeues), (1, 1));
    }

    #[test]
    fn forget_clears_stored_state() {
        let tracker = BackoffTracker::new();
        tracker.record_failed("ns/job", 5);
        tracker.forget("ns/job");
        assert_eq!(tracker.requeue("ns/job"), (0, 0));
    }
}
