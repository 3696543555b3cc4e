//! Replica Reconciler (§4.D): per (job, replica-type), diffs declared
//! replicas against observed pods/services and drives them toward the
//! declared spec.
//!
//! Pod/service construction is grounded on `shards/actions.rs::pod_resource`
//! (owner ref, spec-hash annotation, `ObjectMeta` shape); the
//! create/delete 404/409 swallowing is grounded on
//! `shards/actions.rs::{create_pod, delete_pod}`.

use crate::events::{EventKind, EventSink, REASON_EXITED_WITH_CODE, REASON_SETTED_POD_TEMPLATE_RESTART_POLICY, REASON_SETTED_POD_TEMPLATE_SCHEDULER_NAME};
use crate::expectations::{ExpectationKind, Expectations};
use crate::indexer::index_pods;
use crate::mutator::KubeMutator;
use crate::topology::Cluster;
use crate::util::{self, Error};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use trainjob_common::labels;
use trainjob_types::{ReplicaSpec, ReplicaType, ReplicaStatus, RestartPolicy, TrainJob};

pub const SERVICE_PORT: i32 = 2222;

/// Accumulated across every declared replica-type for one tick; feeds
/// `status::TickSignals` in the Job Reconciler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaOutcome {
    pub status: ReplicaStatus,
    pub restart: bool,
    pub worker0_completed: bool,
    pub any_pod_running: bool,
}

/// Exit codes 1-127 are retryable under `RestartPolicy::ExitCode`; 128+N
/// (signal death) and the reserved 0 (success) are not. Mirrors the
/// upstream controller's retryable-code table referenced by §4.D, minus
/// its magic unset-state sentinel (§9 open question, resolved as
/// `Option<i32>` absence instead).
pub fn is_retryable_exit_code(code: i32) -> bool {
    (1..128).contains(&code)
}

pub fn pod_name(job_name: &str, ty: ReplicaType, index: usize) -> String {
    format!("{job_name}-{}-{index}", ty.as_lowercase())
}

pub fn service_name(job_name: &str, ty: ReplicaType, index: usize) -> String {
    pod_name(job_name, ty, index)
}

fn master_type(replica_groups: &BTreeMap<ReplicaType, ReplicaSpec>) -> ReplicaType {
    replica_groups
        .keys()
        .copied()
        .find(|t| t.is_master_eligible())
        .unwrap_or(ReplicaType::Worker)
}

fn is_master_slot(replica_groups: &BTreeMap<ReplicaType, ReplicaSpec>, ty: ReplicaType, index: usize) -> bool {
    let elected = master_type(replica_groups);
    if elected.is_master_eligible() {
        ty == elected
    } else {
        ty == ReplicaType::Worker && index == 0
    }
}

fn owner_labels(job: &TrainJob, ty: ReplicaType, index: usize, is_master: bool) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(labels::JOB_NAME.to_string(), job.name_any());
    map.insert(labels::GROUP_NAME.to_string(), job.name_any());
    map.insert(labels::REPLICA_TYPE.to_string(), ty.as_lowercase().to_string());
    map.insert(labels::REPLICA_INDEX.to_string(), index.to_string());
    if is_master {
        map.insert(labels::JOB_ROLE.to_string(), labels::JOB_ROLE_MASTER.to_string());
    }
    map
}

/// Builds the pod for `(ty, index)`: deep-copies the declared template,
/// injects `TF_CONFIG` into every container, overwrites restart policy and
/// scheduler name per §4.D's table, and attaches owner ref + labels.
pub fn build_pod(
    job: &TrainJob,
    ty: ReplicaType,
    index: usize,
    spec: &ReplicaSpec,
    cluster: &Cluster,
    gang_enabled: bool,
    gang_scheduler_name: &str,
    sink_warnings: &mut Vec<(&'static str, String)>,
) -> Pod {
    let name = pod_name(&job.name_any(), ty, index);
    let is_master = is_master_slot(&job.spec.replica_groups, ty, index);
    let mut template: PodTemplateSpec = spec.template.clone();
    let mut pod_spec = template.spec.take().unwrap_or_default();

    if let Some(declared) = pod_spec.restart_policy.take()
        && declared != spec.restart_policy.pod_restart_policy()
    {
        sink_warnings.push((
            REASON_SETTED_POD_TEMPLATE_RESTART_POLICY,
            format!("overwrote user-set restartPolicy {declared} with {}", spec.restart_policy.pod_restart_policy()),
        ));
    }
    pod_spec.restart_policy = Some(spec.restart_policy.pod_restart_policy().to_string());

    if gang_enabled {
        match &pod_spec.scheduler_name {
            Some(existing) if existing.as_str() != gang_scheduler_name => {
                sink_warnings.push((
                    REASON_SETTED_POD_TEMPLATE_SCHEDULER_NAME,
                    format!("pod template requests scheduler '{existing}' while gang scheduling is enabled"),
                ));
            }
            Some(_) => {}
            None => pod_spec.scheduler_name = Some(gang_scheduler_name.to_string()),
        }
    }

    if let Some(tf_config) = crate::topology::encode(cluster, ty, index) {
        for container in pod_spec.containers.iter_mut() {
            let env = container.env.get_or_insert_with(Vec::new);
            env.retain(|e| e.name != "TF_CONFIG");
            env.push(k8s_openapi::api::core::v1::EnvVar {
                name: "TF_CONFIG".to_string(),
                value: Some(tf_config.clone()),
                value_from: None,
            });
        }
    }

    let owner_labels = owner_labels(job, ty, index, is_master);
    let mut labels = template.metadata.as_ref().and_then(|m| m.labels.clone()).unwrap_or_default();
    labels.extend(owner_labels);

    Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: job.namespace(),
            owner_references: Some(vec![job.controller_owner_ref(&()).expect("TrainJob is namespaced")]),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                trainjob_common::annotations::SPEC_HASH.to_string(),
                util::hash_spec(&job.spec),
            )])),
            ..Default::default()
        },
        spec: Some(pod_spec),
        status: None,
    }
}

pub fn build_service(job: &TrainJob, ty: ReplicaType, index: usize, is_master: bool) -> Service {
    let name = service_name(&job.name_any(), ty, index);
    let mut selector = BTreeMap::new();
    selector.insert(labels::JOB_NAME.to_string(), job.name_any());
    selector.insert(labels::REPLICA_TYPE.to_string(), ty.as_lowercase().to_string());
    selector.insert(labels::REPLICA_INDEX.to_string(), index.to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: job.namespace(),
            owner_references: Some(vec![job.controller_owner_ref(&()).expect("TrainJob is namespaced")]),
            labels: Some(owner_labels(job, ty, index, is_master)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![ServicePort {
                port: SERVICE_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn container_terminated_exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find_map(|cs| cs.state.as_ref()?.terminated.as_ref().map(|t| t.exit_code))
}

pub async fn reconcile_type(
    job: &TrainJob,
    ty: ReplicaType,
    spec: &ReplicaSpec,
    all_pods: &[Pod],
    all_services: &[Service],
    cluster: &Cluster,
    gang_enabled: bool,
    gang_scheduler_name: &str,
    expectations: &Expectations,
    mutator: &KubeMutator,
    sink: &impl EventSink,
) -> Result<ReplicaOutcome, Error> {
    let job_key = format!("{}/{}", job.namespace().unwrap_or_default(), job.name_any());
    let namespace = job.namespace().ok_or_else(|| Error::UserInput("TrainJob is missing metadata.namespace".to_string()))?;

    let pod_slots = index_pods(all_pods, ty, spec.replicas);
    let service_slots = crate::indexer::index_services(all_services, ty, spec.replicas);

    let mut outcome = ReplicaOutcome::default();
    let mut warnings = Vec::new();

    for index in 0..pod_slots.len() {
        let slot = &pod_slots[index];
        match slot.as_slice() {
            [] => {
                if job.metadata.deletion_timestamp.is_some() || index >= spec.replicas as usize {
                    continue;
                }
                let pod = build_pod(job, ty, index, spec, cluster, gang_enabled, gang_scheduler_name, &mut warnings);
                expectations.expect(&job_key, ty, ExpectationKind::Pod, 1, 0);
                mutator.create_pod(&namespace, &pod).await?;
            }
            [pod] => {
                let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("Unknown");
                match phase {
                    "Running" => outcome.any_pod_running = true,
                    "Pending" => {}
                    "Succeeded" => {
                        outcome.status.succeeded += 1;
                        if ty == ReplicaType::Worker && index == 0 && container_terminated_exit_code(pod) == Some(0) {
                            outcome.worker0_completed = true;
                        }
                    }
                    "Failed" => {
                        outcome.status.failed += 1;
                        if spec.restart_policy == RestartPolicy::ExitCode
                            && let Some(code) = container_terminated_exit_code(pod)
                            && is_retryable_exit_code(code)
                        {
                            sink.event(job, EventKind::Normal, REASON_EXITED_WITH_CODE, format!("pod {} exited {code}, recreating", pod.name_any())).await;
                            expectations.expect(&job_key, ty, ExpectationKind::Pod, 0, 1);
                            mutator.delete_pod(&namespace, &pod.name_any()).await?;
                            outcome.restart = true;
                        }
                    }
                    _ => {}
                }
                if phase == "Running" || phase == "Pending" {
                    outcome.status.active += 1;
                }
            }
            multiple => {
                eprintln!(
                    "warning: slot {ty}/{index} for job {job_key} has {} pods, expected 1; leaving surplus in place",
                    multiple.len()
                );
                outcome.status.active += multiple.len() as u32;
            }
        }
    }

    for index in 0..service_slots.len() {
        if service_slots[index].is_empty() && index < spec.replicas as usize && job.metadata.deletion_timestamp.is_none() {
            let is_master = is_master_slot(&job.spec.replica_groups, ty, index);
            let svc = build_service(job, ty, index, is_master);
            expectations.expect(&job_key, ty, ExpectationKind::Service, 1, 0);
            mutator.create_service(&namespace, &svc).await?;
        }
    }

    for (reason, message) in warnings {
        sink.event(job, EventKind::Warning, reason, message).await;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_exit_codes_exclude_success_and_signal_deaths() {
        assert!(!is_retryable_exit_code(0));
        assert!(is_retryable_exit_code(1));
        assert!(is_retryable_exit_code(127));
        assert!(!is_retryable_exit_code(128));
        assert!(!is_retryable_exit_code(137));
    }

    #[test]
    fn pod_name_encodes_job_type_and_index() {
        assert_eq!(pod_name("mnist", ReplicaType::Worker, 2), "mnist-worker-2");
    }

    #[test]
    fn worker_zero_is_master_when_no_chief_or_master_declared() {
        let mut groups = BTreeMap::new();
        groups.insert(ReplicaType::Worker, ReplicaSpec { replicas: 2, template: Default::default(), restart_policy: RestartPolicy::OnFailure });
        assert!(is_master_slot(&groups, ReplicaType::Worker, 0));
        assert!(!is_master_slot(&groups, ReplicaType::Worker, 1));
    }

    #[test]
    fn chief_group_is_master_even_over_worker_zero() {
        let mut groups = BTreeMap::new();
        groups.insert(ReplicaType::Chief, ReplicaSpec { replicas: 1, template: Default::default(), restart_policy: RestartPolicy::OnFailure });
        groups.insert(ReplicaType::Worker, ReplicaSpec { replicas: 1, template: Default::default(), restart_policy: RestartPolicy::OnFailure });
        assert!(is_master_slot(&groups, ReplicaType::Chief, 0));
        assert!(!is_master_slot(&groups, ReplicaType::Worker, 0));
    }
}
