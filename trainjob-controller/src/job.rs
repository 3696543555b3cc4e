//! Job Reconciler (§4.E) and controller bootstrap. The bootstrap's leader
//! election and `Controller`/`owns` wiring is adapted directly from
//! `clusters/reconcile.rs::run`; the reconcile/determine_action split is
//! kept, generalized from `Cluster`'s five-variant action enum to the
//! TrainJob's richer multi-type reconciliation.

use crate::backoff::{self, BackoffTracker};
use crate::config::Options;
use crate::events::{EventKind, EventSink, KubeEventSink};
use crate::expectations::Expectations;
use crate::gang::{self, PodGroup, PodGroupSpec};
use crate::mutator::KubeMutator;
use crate::replica::{self, ReplicaOutcome};
use crate::status::{self, TickSignals};
use crate::store::{owned_by_uid, ApiStore, Store};
use crate::util::{Error, PROBE_INTERVAL};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::jiff::Timestamp;
use kube::runtime::controller::Action;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use trainjob_types::{ReplicaType, TrainJob, TrainJobStatus};

pub struct JobContext {
    pub client: Client,
    pub config: Options,
    pub store: ApiStore,
    pub mutator: KubeMutator,
    pub events: KubeEventSink,
    pub expectations: Expectations,
    pub backoff: BackoffTracker,
}

/// Entrypoint for the `TrainJob` controller: leader-elects, then drives a
/// `kube::runtime::Controller` owning Pods and Services.
#[cfg(feature = "metrics")]
pub async fn run(client: Client, config: Options, registry: prometheus::Registry) -> Result<(), Error> {
    println!("{}", "⚙️ Starting TrainJob controller...".green());

    let events = KubeEventSink::new(
        client.clone(),
        crate::util::metrics::ControllerMetrics::new_with_registry("trainjob", registry),
    );

    run_inner(client, config, events).await
}

#[cfg(not(feature = "metrics"))]
pub async fn run(client: Client, config: Options) -> Result<(), Error> {
    println!("{}", "⚙️ Starting TrainJob controller...".green());
    let events = KubeEventSink::new(client.clone());
    run_inner(client, config, events).await
}

async fn run_inner(client: Client, config: Options, events: KubeEventSink) -> Result<(), Error> {

    let context = Arc::new(JobContext {
        client: client.clone(),
        store: ApiStore::new(client.clone()),
        mutator: KubeMutator::new(client.clone()),
        events,
        expectations: Expectations::new(),
        backoff: BackoffTracker::new(),
        config: config.clone(),
    });

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("trainjob-controller-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &config.namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "trainjob-controller-lock".to_string(),
            lease_ttl: Duration::from_secs(15),
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        trainjob_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    trainjob_common::signal_ready();

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "👑 Acquired leadership; starting controller".green());
                let namespace = config.namespace.clone();
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let jobs_api: Api<TrainJob> = Api::namespaced(client_for_controller.clone(), &namespace);
                controller_task = Some(tokio::spawn(async move {
                    let worker_threads = context_for_controller.config.worker_threads;
                    Controller::new(jobs_api, Default::default())
                        .owns(Api::<Pod>::namespaced(client_for_controller.clone(), &namespace), Default::default())
                        .owns(Api::<Service>::namespaced(client_for_controller, &namespace), Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each_concurrent(worker_threads, |_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping controller");
            task.abort();
        }
    }
}

fn now_time() -> Time {
    Time(Timestamp::now())
}

/// `enableDynamicWorker` bypasses the expectation gate (§9 open question):
/// an autoscaler-driven scale-out shouldn't wait out a stale bucket. This is
/// documented, not prevented — high churn under dynamic workers can still
/// cause create/delete oscillation.
fn expectation_gate_blocks(enable_dynamic_worker: bool, expectations_satisfied: bool) -> bool {
    !enable_dynamic_worker && !expectations_satisfied
}

async fn reconcile(job: Arc<TrainJob>, ctx: Arc<JobContext>) -> Result<Action, Error> {
    let tick_start = Instant::now();
    let namespace = job
        .namespace()
        .ok_or_else(|| Error::UserInput("TrainJob must be namespaced".to_string()))?;
    let name = job.name_any();
    let job_key = format!("{namespace}/{name}");
    ctx.events.record_reconcile(&name, &namespace);

    // Step 1: fetch. A missing job means the cache already reflects
    // deletion; forget its expectations and stop.
    if ctx.store.get_job(&namespace, &name).await?.is_none() {
        ctx.expectations.forget(&job_key);
        ctx.backoff.forget(&job_key);
        ctx.events.record_jobs_deleted();
        ctx.events.record_action(&name, &namespace, "job_deleted");
        ctx.events.observe_write(&name, &namespace, "job_deleted", tick_start.elapsed().as_secs_f64());
        return Ok(Action::await_change());
    }

    // Step 2: deep-copy — `job` is already an owned snapshot (Arc clone of
    // the cache entry); all mutation below happens on a local copy.
    let mut status = job.status.clone().unwrap_or_default();

    // Step 3: expectation gate.
    if expectation_gate_blocks(job.spec.enable_dynamic_worker, ctx.expectations.satisfied(&job_key)) {
        ctx.events.record_action(&name, &namespace, "expectations_pending");
        ctx.events.observe_read(&name, &namespace, "expectations_pending", tick_start.elapsed().as_secs_f64());
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    // Step 5: terminal shortcut.
    if status.is_terminal() {
        ctx.events.record_action(&name, &namespace, "terminal");
        let result = finish_terminal(&job, &namespace, &job_key, status, &ctx).await;
        ctx.events.observe_write(&name, &namespace, "terminal", tick_start.elapsed().as_secs_f64());
        return result;
    }

    // Step 6: list observed pods/services, defensively re-filtered by owner UID.
    let owner_uid = job.uid().unwrap_or_default();
    let all_pods: Vec<Pod> = ctx
        .store
        .list_owned_pods(&namespace, &name)
        .await?
        .into_iter()
        .filter(|p| owned_by_uid(p, &owner_uid))
        .collect();
    let all_services: Vec<Service> = ctx
        .store
        .list_owned_services(&namespace, &name)
        .await?
        .into_iter()
        .filter(|s| owned_by_uid(s, &owner_uid))
        .collect();
    ctx.events.observe_read(&name, &namespace, "sync", tick_start.elapsed().as_secs_f64());
    let write_start = Instant::now();

    // Step 7: backoff / deadline limit checks.
    let (prev_failed, previous_requeues) = ctx.backoff.requeue(&job_key);
    if let Some(reason_message) = check_limits(&job, &status, &all_pods, prev_failed, previous_requeues) {
        delete_all(&ctx, &namespace, &all_pods, &all_services, &job, &job_key).await?;
        let (reason, message) = reason_message;
        status::fail(&mut status, reason, &message, now_time());
        ctx.events
            .event(&job, EventKind::Warning, crate::events::REASON_TRAIN_JOB_FAILED, message)
            .await;
        ctx.mutator.update_job_status(&job, status).await?;
        ctx.expectations.forget(&job_key);
        ctx.backoff.forget(&job_key);
        ctx.events.record_action(&name, &namespace, "failed_limit");
        ctx.events.observe_write(&name, &namespace, "failed_limit", write_start.elapsed().as_secs_f64());
        return Ok(Action::await_change());
    }
    let failed_total: u32 = status.replica_statuses.values().map(|s| s.failed).sum();
    ctx.backoff.record_failed(&job_key, failed_total);

    // Step 8: normal path — gang-scheduling sync, per-type reconcile fan-out.
    if job.spec.scheduling.gang_scheduling && ctx.config.enable_gang_scheduling {
        let group = PodGroup {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                owner_references: Some(vec![job.controller_owner_ref(&()).expect("namespaced")]),
                ..Default::default()
            },
            spec: PodGroupSpec {
                min_available: gang::min_available(&job.spec.replica_groups),
            },
        };
        ctx.mutator.sync_pod_group(&namespace, &group).await?;
    }

    let cluster = build_cluster(&job);
    let mut signals = TickSignals { no_pods_observed: all_pods.is_empty(), ..Default::default() };

    for (ty, spec) in job.spec.replica_groups.clone() {
        let outcome: ReplicaOutcome = replica::reconcile_type(
            &job,
            ty,
            &spec,
            &all_pods,
            &all_services,
            &cluster,
            ctx.config.enable_gang_scheduling,
            &ctx.config.gang_scheduler_name,
            &ctx.expectations,
            &ctx.mutator,
            &ctx.events,
        )
        .await?;

        signals.any_pod_running |= outcome.any_pod_running;
        signals.any_restart |= outcome.restart;
        signals.worker0_completed |= outcome.worker0_completed;
        if ty.determines_success() {
            signals.master_group_all_succeeded |= outcome.status.succeeded >= spec.replicas && spec.replicas > 0;
        }
        status.replica_statuses.insert(ty, outcome.status);
    }

    let changed = status::advance(&mut status, signals, now_time());

    // Step 9: commit only if the status actually changed.
    if changed || job.status.as_ref() != Some(&status) {
        if let Some(phase) = status.phase() {
            println!(
                "🔧 {}{}{}{}{}",
                namespace.color(crate::util::colors::FG2),
                "/".color(crate::util::colors::FG1),
                name.color(crate::util::colors::FG2),
                " PHASE: ".color(crate::util::colors::FG1),
                phase.to_string().color(crate::util::colors::FG2),
            );
        }
        ctx.mutator.update_job_status(&job, status).await?;
    }

    ctx.events.record_action(&name, &namespace, "synced");
    ctx.events.observe_write(&name, &namespace, "synced", write_start.elapsed().as_secs_f64());

    Ok(Action::requeue(ctx.config.resync_period.max(PROBE_INTERVAL)))
}

async fn finish_terminal(
    job: &TrainJob,
    namespace: &str,
    job_key: &str,
    mut status: TrainJobStatus,
    ctx: &JobContext,
) -> Result<Action, Error> {
    let owner_uid = job.uid().unwrap_or_default();
    let pods: Vec<Pod> = ctx
        .store
        .list_owned_pods(namespace, &job.name_any())
        .await?
        .into_iter()
        .filter(|p| owned_by_uid(p, &owner_uid))
        .collect();
    let services: Vec<Service> = ctx
        .store
        .list_owned_services(namespace, &job.name_any())
        .await?
        .into_iter()
        .filter(|s| owned_by_uid(s, &owner_uid))
        .collect();

    delete_all(ctx, namespace, &pods, &services, job, job_key).await?;

    if ctx.config.enable_gang_scheduling {
        ctx.mutator.delete_pod_group(namespace, &job.name_any()).await?;
    }
    ctx.expectations.forget(job_key);
    ctx.backoff.forget(job_key);

    if status.phase() == Some(trainjob_types::JobConditionType::Succeeded) {
        for replica_status in status.replica_statuses.values_mut() {
            replica_status.succeeded += replica_status.active;
            replica_status.active = 0;
        }
        ctx.mutator.update_job_status(job, status).await?;
    }

    Ok(Action::await_change())
}

async fn delete_all(
    ctx: &JobContext,
    namespace: &str,
    pods: &[Pod],
    services: &[Service],
    job: &TrainJob,
    job_key: &str,
) -> Result<(), Error> {
    for pod in pods {
        ctx.expectations.expect(job_key, replica_type_of(pod), crate::expectations::ExpectationKind::Pod, 0, 1);
        ctx.mutator.delete_pod(namespace, &pod.name_any()).await?;
    }
    for svc in services {
        ctx.expectations.expect(job_key, replica_type_of(svc), crate::expectations::ExpectationKind::Service, 0, 1);
        ctx.mutator.delete_service(namespace, &svc.name_any()).await?;
    }
    let _ = job;
    Ok(())
}

/// Replica type an owned pod/service belongs to, read off its
/// `replica-type` label. Falls back to `Worker` when the label is missing
/// or unparseable (e.g. a hand-crafted object slipping past the selector).
fn replica_type_of<T: ResourceExt>(obj: &T) -> ReplicaType {
    obj.labels()
        .get(trainjob_common::labels::REPLICA_TYPE)
        .and_then(|s| s.parse().ok())
        .unwrap_or(ReplicaType::Worker)
}

/// Checks backoff and deadline breaches (§4.E step 7). Returns
/// `Some((reason, message))` if the job should transition to `Failed`.
///
/// `prev_failed`/`previous_requeues` are this job's backoff state as of the
/// last tick (`BackoffTracker`), feeding the second disjunct below.
fn check_limits(
    job: &TrainJob,
    status: &TrainJobStatus,
    pods: &[Pod],
    prev_failed: u32,
    previous_requeues: u32,
) -> Option<(&'static str, String)> {
    if let Some(limit) = job.spec.backoff_limit {
        let restarts: i32 = pods
            .iter()
            .filter(|p| {
                job_group_of(job, p)
                    .map(|(ty, spec)| {
                        ty.participates_in_backoff()
                            && matches!(spec.restart_policy, trainjob_types::RestartPolicy::OnFailure | trainjob_types::RestartPolicy::Always)
                    })
                    .unwrap_or(false)
            })
            .filter(|p| matches!(p.status.as_ref().and_then(|s| s.phase.as_deref()), Some("Running") | Some("Pending")))
            .map(|p| container_restart_count(p))
            .sum();
        let tripped = if limit == 0 { restarts > 0 } else { restarts as u32 >= limit };
        if tripped {
            return Some(("BackoffLimitExceeded", format!("container restarts ({restarts}) reached backoffLimit ({limit})")));
        }

        let failed: u32 = status.replica_statuses.values().map(|s| s.failed).sum();
        let active: u32 = status.replica_statuses.values().map(|s| s.active).sum();
        let total_replicas: u32 = job.spec.replica_groups.values().map(|s| s.replicas).sum();
        if backoff::second_disjunct_trips(failed, prev_failed, active, total_replicas, previous_requeues, limit) {
            return Some((
                "BackoffLimitExceeded",
                format!("failed replicas grew ({prev_failed} -> {failed}) after {previous_requeues} prior requeues against backoffLimit ({limit})"),
            ));
        }
    }

    if let (Some(deadline), Some(start)) = (job.spec.active_deadline_seconds, status.start_time.as_ref()) {
        let elapsed_secs = Timestamp::now().duration_since(start.0).as_secs();
        if elapsed_secs >= deadline as i64 {
            return Some(("DeadlineExceeded", format!("activeDeadlineSeconds ({deadline}) exceeded")));
        }
    }

    None
}

fn job_group_of<'a>(job: &'a TrainJob, pod: &Pod) -> Option<(ReplicaType, &'a trainjob_types::ReplicaSpec)> {
    let ty: ReplicaType = pod
        .labels()
        .get(trainjob_common::labels::REPLICA_TYPE)?
        .parse()
        .ok()?;
    job.spec.replica_groups.get(&ty).map(|spec| (ty, spec))
}

fn container_restart_count(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|cs| cs.restart_count).sum())
        .unwrap_or(0)
}

/// Addresses are derived from the declared replica counts, not from
/// currently-observed pods: the headless service DNS name for slot `i` is
/// deterministic the moment the replica group is declared, so `TF_CONFIG`
/// can list every peer from the very first tick instead of only the ones
/// whose pods have already been created (§4.C edge case, cold start).
fn build_cluster(job: &TrainJob) -> crate::topology::Cluster {
    let mut cluster = crate::topology::Cluster::new();
    for (ty, spec) in &job.spec.replica_groups {
        let addrs = (0..spec.replicas as usize)
            .map(|index| Some(format!("{}:{}", replica::service_name(&job.name_any(), *ty, index), replica::SERVICE_PORT)))
            .collect();
        cluster.insert(*ty, addrs);
    }
    cluster
}

/// §7's invalid-input path: a `TrainJob` the core can't act on (missing
/// namespace, bad owner data) forgets any in-flight bookkeeping, reports a
/// warning event, and isn't re-enqueued — retrying wouldn't change the
/// outcome without the object itself changing.
fn on_error(job: Arc<TrainJob>, error: &Error, ctx: Arc<JobContext>) -> Action {
    eprintln!("{}", format!("reconcile error for {}: {error:?}", job.name_any()).red());
    if let Error::UserInput(_) = error {
        let job_key = format!("{}/{}", job.namespace().unwrap_or_default(), job.name_any());
        ctx.expectations.forget(&job_key);
        ctx.backoff.forget(&job_key);
        let job_for_event = job.clone();
        tokio::spawn(async move {
            ctx.events
                .event(
                    &job_for_event,
                    EventKind::Warning,
                    crate::events::REASON_FAILED_MARSHAL_TRAIN_JOB,
                    "TrainJob could not be reconciled: invalid object".to_string(),
                )
                .await;
        });
        return Action::await_change();
    }
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};
    use std::collections::BTreeMap;
    use trainjob_types::{ReplicaSpec, RestartPolicy};

    #[test]
    fn dynamic_worker_bypasses_expectation_gate() {
        assert!(expectation_gate_blocks(false, false));
        assert!(!expectation_gate_blocks(true, false));
        assert!(!expectation_gate_blocks(false, true));
    }

    #[test]
    fn build_cluster_produces_dense_arrays_for_every_declared_replica_regardless_of_pods_observed() {
        let mut job = TrainJob::new("mnist", trainjob_types::TrainJobSpec::default());
        job.spec.replica_groups.insert(
            ReplicaType::Worker,
            ReplicaSpec { replicas: 2, template: Default::default(), restart_policy: RestartPolicy::OnFailure },
        );
        let cluster = build_cluster(&job);
        assert_eq!(
            cluster[&ReplicaType::Worker],
            vec![Some("mnist-worker-0:2222".to_string()), Some("mnist-worker-1:2222".to_string())],
        );
    }

    fn worker_job(restart_policy: RestartPolicy, backoff_limit: Option<u32>) -> TrainJob {
        let mut job = TrainJob::new("mnist", trainjob_types::TrainJobSpec::default());
        job.spec.replica_groups.insert(
            ReplicaType::Worker,
            ReplicaSpec { replicas: 1, template: Default::default(), restart_policy },
        );
        job.spec.backoff_limit = backoff_limit;
        job
    }

    fn pod_with_restarts(restarts: i32) -> Pod {
        let mut labels = BTreeMap::new();
        labels.insert(trainjob_common::labels::REPLICA_TYPE.to_string(), "worker".to_string());
        Pod {
            metadata: ObjectMeta { labels: Some(labels), ..Default::default() },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![ContainerStatus { restart_count: restarts, ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn check_limits_trips_backoff_limit_zero_on_any_restart() {
        let job = worker_job(RestartPolicy::OnFailure, Some(0));
        let status = TrainJobStatus::default();
        let pods = vec![pod_with_restarts(1)];
        let result = check_limits(&job, &status, &pods, 0, 0);
        assert!(matches!(result, Some((reason, _)) if reason == "BackoffLimitExceeded"));
    }

    #[test]
    fn check_limits_does_not_trip_below_backoff_limit() {
        let job = worker_job(RestartPolicy::OnFailure, Some(3));
        let status = TrainJobStatus::default();
        let pods = vec![pod_with_restarts(1)];
        assert!(check_limits(&job, &status, &pods, 0, 0).is_none());
    }

    #[test]
    fn check_limits_trips_on_active_deadline_exceeded() {
        let mut job = worker_job(RestartPolicy::OnFailure, None);
        job.spec.active_deadline_seconds = Some(0);
        let mut status = TrainJobStatus::default();
        status.start_time = Some(now_time());
        let result = check_limits(&job, &status, &[], 0, 0);
        assert!(matches!(result, Some((reason, _)) if reason == "DeadlineExceeded"));
    }

    #[test]
    fn check_limits_leaves_a_healthy_job_alone() {
        let job = worker_job(RestartPolicy::OnFailure, Some(3));
        let status = TrainJobStatus::default();
        assert!(check_limits(&job, &status, &[], 0, 0).is_none());
    }

    #[test]
    fn replica_type_of_falls_back_to_worker_when_label_missing() {
        assert_eq!(replica_type_of(&Pod::default()), ReplicaType::Worker);
    }

    #[test]
    fn replica_type_of_reads_the_replica_type_label() {
        let mut labels = BTreeMap::new();
        labels.insert(trainjob_common::labels::REPLICA_TYPE.to_string(), "ps".to_string());
        let pod = Pod {
            metadata: ObjectMeta { labels: Some(labels), ..Default::default() },
            ..Default::default()
        };
        assert_eq!(replica_type_of(&pod), ReplicaType::PS);
    }
}
