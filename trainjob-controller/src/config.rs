use clap::Parser;
use std::time::Duration;

/// Startup options for the TrainJob controller (§6 Configuration).
#[derive(Parser, Debug, Clone)]
pub struct Options {
    /// Enables gang scheduling: a `PodGroup` is synced alongside each
    /// TrainJob's pods and `schedulerName` is set on templates that don't
    /// already declare one.
    #[arg(long, env = "ENABLE_GANG_SCHEDULING", default_value_t = false)]
    pub enable_gang_scheduling: bool,

    /// Scheduler name written onto pod templates when gang scheduling is
    /// enabled and the user hasn't picked a different one.
    #[arg(long, env = "GANG_SCHEDULER_NAME", default_value = "kube-batch")]
    pub gang_scheduler_name: String,

    /// Number of reconciles the controller drives concurrently.
    #[arg(long, env = "WORKER_THREADS", default_value_t = 1)]
    pub worker_threads: usize,

    /// How often a converged job is requeued even without a new event.
    #[arg(long, env = "RESYNC_PERIOD", value_parser = parse_duration::parse, default_value = "15s")]
    pub resync_period: Duration,

    /// Namespace the controller runs and leader-elects in. RBAC stays
    /// namespaced rather than cluster-scoped.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = Options::parse_from(["trainjob-controller"]);
        assert!(!opts.enable_gang_scheduling);
        assert_eq!(opts.gang_scheduler_name, "kube-batch");
        assert_eq!(opts.worker_threads, 1);
        assert_eq!(opts.resync_period, Duration::from_secs(15));
    }
}
