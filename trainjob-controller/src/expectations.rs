//! Expectations Registry (§4.A): pending-creation/deletion counters that
//! keep the controller from reacting to its own in-flight mutations.
//!
//! Grounded on the reference operator's `Mutex<HashMap<(String, String),
//! _>>` last-action cache (`clusters/reconcile.rs::ContextData`) — same
//! shape, applied to a different bucket key.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use trainjob_types::ReplicaType;

/// A bucket is satisfied-or-expired this long after being recorded, even if
/// the controller never observed the matching cache event (lost watch).
pub const EXPIRATION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectationKind {
    Pod,
    Service,
}

type Key = (String, ReplicaType, ExpectationKind);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    pending_adds: i64,
    pending_dels: i64,
    timestamp: Instant,
}

impl Bucket {
    fn satisfied_or_expired(&self, now: Instant) -> bool {
        (self.pending_adds <= 0 && self.pending_dels <= 0)
            || now.duration_since(self.timestamp) > EXPIRATION
    }
}

#[derive(Default)]
pub struct Expectations {
    buckets: Mutex<HashMap<Key, Bucket>>,
}

impl Expectations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `adds`/`dels` pending operations for `(job_key, type, kind)`.
    /// Must be called *before* issuing the creating/deleting RPC (§5
    /// ordering guarantee) so the earliest possible cache observation races
    /// safely against the mutation actually landing.
    pub fn expect(&self, job_key: &str, ty: ReplicaType, kind: ExpectationKind, adds: i64, dels: i64) {
        let mut buckets = self.buckets.lock().unwrap();
        let key = (job_key.to_string(), ty, kind);
        let bucket = buckets.entry(key).or_insert(Bucket {
            pending_adds: 0,
            pending_dels: 0,
            timestamp: Instant::now(),
        });
        bucket.pending_adds += adds;
        bucket.pending_dels += dels;
        bucket.timestamp = Instant::now();
    }

    /// Decrements the counter matching `is_add`, clamped at zero. Called
    /// when the Store reports a pod/service add or delete for this bucket.
    pub fn observe(&self, job_key: &str, ty: ReplicaType, kind: ExpectationKind, is_add: bool) {
        let mut buckets = self.buckets.lock().unwrap();
        let key = (job_key.to_string(), ty, kind);
        if let Some(bucket) = buckets.get_mut(&key) {
            if is_add {
                bucket.pending_adds = (bucket.pending_adds - 1).max(0);
            } else {
                bucket.pending_dels = (bucket.pending_dels - 1).max(0);
            }
        }
    }

    /// True iff every bucket belonging to `job_key` is satisfied or expired.
    pub fn satisfied(&self, job_key: &str) -> bool {
        let buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        buckets
            .iter()
            .filter(|((k, _, _), _)| k.as_str() == job_key)
            .all(|(_, bucket)| bucket.satisfied_or_expired(now))
    }

    /// Drops all buckets for `job_key` on terminal cleanup or job deletion.
    pub fn forget(&self, job_key: &str) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.retain(|(k, _, _), _| k.as_str() != job_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshly_expected_bucket_is_unsatisfied() {
        let reg = Expectations::new();
        reg.expect("ns/job", ReplicaType::Worker, ExpectationKind::Pod, 2, 0);
        assert!(!reg.satisfied("ns/job"));
    }

    #[test]
    fn observing_all_adds_satisfies_the_bucket() {
        let reg = Expectations::new();
        reg.expect("ns/job", ReplicaType::Worker, ExpectationKind::Pod, 2, 0);
        reg.observe("ns/job", ReplicaType::Worker, ExpectationKind::Pod, true);
        assert!(!reg.satisfied("ns/job"));
        reg.observe("ns/job", ReplicaType::Worker, ExpectationKind::Pod, true);
        assert!(reg.satisfied("ns/job"));
    }

    #[test]
    fn observe_is_clamped_at_zero_and_does_not_go_negative() {
        let reg = Expectations::new();
        reg.expect("ns/job", ReplicaType::Worker, ExpectationKind::Pod, 1, 0);
        reg.observe("ns/job", ReplicaType::Worker, ExpectationKind::Pod, true);
        reg.observe("ns/job", ReplicaType::Worker, ExpectationKind::Pod, true);
        assert!(reg.satisfied("ns/job"));
        // A stray extra add expectation after satisfaction should still gate.
        reg.expect("ns/job", ReplicaType::Worker, ExpectationKind::Pod, 1, 0);
        assert!(!reg.satisfied("ns/job"));
    }

    #[test]
    fn distinct_buckets_are_independent() {
        let reg = Expectations::new();
        reg.expect("ns/job", ReplicaType::Worker, ExpectationKind::Pod, 1, 0);
        reg.expect("ns/job", ReplicaType::PS, ExpectationKind::Pod, 1, 0);
        reg.observe("ns/job", ReplicaType::Worker, ExpectationKind::Pod, true);
        // PS bucket is still pending.
        assert!(!reg.satisfied("ns/job"));
    }

    #[test]
    fn forget_drops_all_buckets_for_the_job() {
        let reg = Expectations::new();
        reg.expect("ns/job", ReplicaType::Worker, ExpectationKind::Pod, 5, 0);
        reg.forget("ns/job");
        assert!(reg.satisfied("ns/job"));
    }

    #[test]
    fn expired_bucket_counts_as_satisfied() {
        let reg = Expectations::new();
        reg.expect("ns/job", ReplicaType::Worker, ExpectationKind::Pod, 1, 0);
        {
            let mut buckets = reg.buckets.lock().unwrap();
            for bucket in buckets.values_mut() {
                bucket.timestamp = Instant::now() - EXPIRATION - Duration::from_secs(1);
            }
        }
        assert!(reg.satisfied("ns/job"));
    }
}
