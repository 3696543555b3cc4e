//! Reconciliation metrics exposed on the `metrics` feature, grounded on the
//! same read/write-phase histogram + per-action counter shape the reference
//! operator uses, with the `jobs_deleted_total` counter named in §6.

use prometheus::{HistogramVec, IntCounter, IntCounterVec, Opts, Registry, register_histogram_vec_with_registry, register_int_counter_vec_with_registry, register_int_counter_with_registry};

#[derive(Clone)]
pub struct ControllerMetrics {
    pub registry: Registry,
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
    pub jobs_deleted_total: IntCounter,
}

impl ControllerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let registry = Registry::new();
        Self::new_with_registry(subsystem, registry)
    }

    pub fn new_with_registry(subsystem: &str, registry: Registry) -> Self {
        let reconcile_counter = register_int_counter_vec_with_registry!(
            Opts::new(
                "trainjob_reconcile_total",
                "Total number of reconcile invocations per TrainJob"
            )
            .subsystem(subsystem),
            &["name", "namespace"],
            registry
        )
        .expect("register trainjob_reconcile_total");

        let action_counter = register_int_counter_vec_with_registry!(
            Opts::new(
                "trainjob_reconcile_action_total",
                "Total number of reconcile actions taken, by kind"
            )
            .subsystem(subsystem),
            &["name", "namespace", "action"],
            registry
        )
        .expect("register trainjob_reconcile_action_total");

        let read_histogram = register_histogram_vec_with_registry!(
            "trainjob_reconcile_read_seconds",
            "Time spent determining the next action during a reconcile tick",
            &["name", "namespace", "action"],
            registry
        )
        .expect("register trainjob_reconcile_read_seconds");

        let write_histogram = register_histogram_vec_with_registry!(
            "trainjob_reconcile_write_seconds",
            "Time spent applying the chosen action during a reconcile tick",
            &["name", "namespace", "action"],
            registry
        )
        .expect("register trainjob_reconcile_write_seconds");

        // Deliberately no `.subsystem(subsystem)` here: §6 names this metric
        // literally `jobs_deleted_total`, not `<subsystem>_jobs_deleted_total`.
        let jobs_deleted_total = register_int_counter_with_registry!(
            Opts::new(
                "jobs_deleted_total",
                "Number of TrainJobs observed as deleted from the Store during reconcile"
            ),
            registry
        )
        .expect("register jobs_deleted_total");

        Self {
            registry,
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
            jobs_deleted_total,
        }
    }
}
