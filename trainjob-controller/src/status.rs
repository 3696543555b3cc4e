//! Status Transition Logic (§4.G): computes the next condition set from
//! this tick's accumulated replica outcomes. Pure function over a snapshot
//! plus signals — no I/O — so it is exercised directly by unit tests the
//! way the reference operator tests `get_phase`/`get_last_updated`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use trainjob_types::{JobCondition, JobConditionType, TrainJobStatus};

/// Signals gathered by the Job Reconciler over one tick, summarizing what
/// the Replica Reconciler observed across every declared type.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSignals {
    pub worker0_completed: bool,
    pub master_group_all_succeeded: bool,
    pub any_pod_running: bool,
    pub any_restart: bool,
    pub no_pods_observed: bool,
}

/// Appends a condition if it isn't a no-op repeat of the last one (§4.G
/// idempotence rule), returning whether anything changed.
pub fn append_condition(status: &mut TrainJobStatus, ty: JobConditionType, reason: &str, message: &str, now: Time) -> bool {
    if let Some(last) = status.conditions.last()
        && last.type_ == ty
        && last.reason == reason
    {
        return false;
    }
    status.conditions.push(JobCondition {
        type_: ty,
        status: true,
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now,
    });
    true
}

/// Advances `status` in place per §4.G's ordered rule list. Returns `true`
/// if the status was mutated (used by §4.E step 9's "commit only if
/// different" rule).
pub fn advance(status: &mut TrainJobStatus, signals: TickSignals, now: Time) -> bool {
    if status.is_terminal() {
        // Monotonicity (§8): once terminal, no further condition is appended.
        return false;
    }

    if signals.worker0_completed || signals.master_group_all_succeeded {
        append_condition(status, JobConditionType::Succeeded, "", "", now.clone());
        if status.completion_time.is_none() {
            status.completion_time = Some(now);
        }
        for replica_status in status.replica_statuses.values_mut() {
            replica_status.succeeded += replica_status.active;
            replica_status.active = 0;
        }
        return true;
    }

    if signals.any_pod_running && !status.conditions.iter().any(|c| c.type_ == JobConditionType::Running) {
        if status.start_time.is_none() {
            status.start_time = Some(now.clone());
        }
        return append_condition(status, JobConditionType::Running, "", "", now);
    }

    if signals.any_restart {
        return append_condition(status, JobConditionType::Restarting, "PodRestarting", "", now);
    }

    if signals.no_pods_observed && status.conditions.is_empty() {
        return append_condition(status, JobConditionType::Created, "", "", now);
    }

    false
}

/// Appends the terminal `Failed` condition for a backoff/deadline breach
/// (§4.E step 7). Separate from `advance` because it short-circuits the
/// ordered rule list entirely rather than competing with it.
pub fn fail(status: &mut TrainJobStatus, reason: &str, message: &str, now: Time) -> bool {
    append_condition(status, JobConditionType::Failed, reason, message, now.clone());
    if status.completion_time.is_none() {
        status.completion_time = Some(now);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::jiff::Timestamp;
    use trainjob_types::ReplicaStatus;

    fn now() -> Time {
        Time(Timestamp::now())
    }

    #[test]
    fn running_is_appended_once_and_sets_start_time() {
        let mut status = TrainJobStatus::default();
        let signals = TickSignals { any_pod_running: true, ..Default::default() };
        assert!(advance(&mut status, signals, now()));
        assert_eq!(status.conditions.len(), 1);
        assert!(status.start_time.is_some());
        // Second tick with the same signal is a no-op append.
        assert!(!advance(&mut status, signals, now()));
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn succeeded_folds_active_into_succeeded_and_sets_completion_time() {
        let mut status = TrainJobStatus::default();
        status.replica_statuses.insert(
            trainjob_types::ReplicaType::Worker,
            ReplicaStatus { active: 2, succeeded: 0, failed: 0 },
        );
        let signals = TickSignals { worker0_completed: true, ..Default::default() };
        advance(&mut status, signals, now());
        let worker = &status.replica_statuses[&trainjob_types::ReplicaType::Worker];
        assert_eq!(worker.active, 0);
        assert_eq!(worker.succeeded, 2);
        assert!(status.completion_time.is_some());
    }

    #[test]
    fn terminal_status_never_accepts_another_condition() {
        let mut status = TrainJobStatus::default();
        fail(&mut status, "BackoffLimitExceeded", "too many restarts", now());
        let len_before = status.conditions.len();
        let signals = TickSignals { any_pod_running: true, ..Default::default() };
        assert!(!advance(&mut status, signals, now()));
        assert_eq!(status.conditions.len(), len_before);
    }

    #[test]
    fn created_is_only_appended_on_a_truly_empty_status() {
        let mut status = TrainJobStatus::default();
        let signals = TickSignals { no_pods_observed: true, ..Default::default() };
        assert!(advance(&mut status, signals, now()));
        assert_eq!(status.conditions[0].type_, JobConditionType::Created);
    }
}
