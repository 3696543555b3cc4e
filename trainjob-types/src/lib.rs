use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// The set of roles a replica group may play within a `TrainJob`.
///
/// Unlike the upstream controller this mirrors, the type is a closed, `Copy`
/// enum rather than an open string — callers can't typo a replica type past
/// the compiler, and the capability table below replaces runtime
/// string-switches with exhaustive matches.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, JsonSchema)]
pub enum ReplicaType {
    Chief,
    Master,
    Worker,
    PS,
    Evaluator,
}

impl ReplicaType {
    pub const ALL: [ReplicaType; 5] = [
        ReplicaType::Chief,
        ReplicaType::Master,
        ReplicaType::Worker,
        ReplicaType::PS,
        ReplicaType::Evaluator,
    ];

    /// Lowercased form used in `TF_CONFIG` cluster keys and DNS-safe pod/service names.
    pub fn as_lowercase(&self) -> &'static str {
        match self {
            ReplicaType::Chief => "chief",
            ReplicaType::Master => "master",
            ReplicaType::Worker => "worker",
            ReplicaType::PS => "ps",
            ReplicaType::Evaluator => "evaluator",
        }
    }

    /// Whether pods of this type are candidates for `job-role=master`.
    pub fn is_master_eligible(&self) -> bool {
        matches!(self, ReplicaType::Chief | ReplicaType::Master)
    }

    /// Whether restartCount on pods of this type contributes to the job's
    /// backoff budget (§4.E). Evaluators are typically short-lived and
    /// excluded upstream; PS and Worker participate.
    pub fn participates_in_backoff(&self) -> bool {
        !matches!(self, ReplicaType::Evaluator)
    }

    /// Whether this type's pods reaching Succeeded can independently decide
    /// overall job success (§4.G). Chief/Master always can; Worker only via
    /// the worker-0 special case handled in the replica reconciler.
    pub fn determines_success(&self) -> bool {
        self.is_master_eligible()
    }
}

impl fmt::Display for ReplicaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_lowercase())
    }
}

impl FromStr for ReplicaType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chief" => Ok(ReplicaType::Chief),
            "master" => Ok(ReplicaType::Master),
            "worker" => Ok(ReplicaType::Worker),
            "ps" => Ok(ReplicaType::PS),
            "evaluator" => Ok(ReplicaType::Evaluator),
            _ => Err(()),
        }
    }
}

/// Per-replica-group restart policy, as declared on the spec.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum RestartPolicy {
    Never,
    OnFailure,
    Always,
    /// The core restarts the pod itself by deleting it on a retryable exit
    /// code, rather than delegating to kubelet's container restart policy.
    #[default]
    ExitCode,
}

impl RestartPolicy {
    /// Maps the replica-level policy to the pod-level `restartPolicy` the
    /// core writes onto created pods (§4.D table).
    pub fn pod_restart_policy(&self) -> &'static str {
        match self {
            RestartPolicy::Never => "Never",
            RestartPolicy::OnFailure => "OnFailure",
            RestartPolicy::Always => "Always",
            RestartPolicy::ExitCode => "Never",
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Never => write!(f, "Never"),
            RestartPolicy::OnFailure => write!(f, "OnFailure"),
            RestartPolicy::Always => write!(f, "Always"),
            RestartPolicy::ExitCode => write!(f, "ExitCode"),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One declared replica group: how many pods, what they run, how they
/// restart.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ReplicaSpec {
    #[serde(default)]
    pub replicas: u32,
    pub template: PodTemplateSpec,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub struct SchedulingPolicy {
    /// Mirrors `enableGangScheduling` at the controller level but allows a
    /// job to opt out even when the controller has it enabled globally.
    #[serde(default = "default_true")]
    pub gang_scheduling: bool,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self { gang_scheduling: true }
    }
}

#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "trainjob.example.io",
    version = "v1",
    kind = "TrainJob",
    plural = "trainjobs",
    derive = "PartialEq",
    status = "TrainJobStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.startTime\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
pub struct TrainJobSpec {
    pub replica_groups: BTreeMap<ReplicaType, ReplicaSpec>,

    /// Pod container restart count budget across all backoff-eligible
    /// replica groups. `Some(0)` means "any restart trips the job."
    pub backoff_limit: Option<u32>,

    /// Wall-clock budget from `status.startTime`, in seconds.
    pub active_deadline_seconds: Option<u64>,

    /// Bypasses expectation gating (§4.A) so scale-outs driven by an
    /// external autoscaler aren't delayed behind stale expectations.
    #[serde(default)]
    pub enable_dynamic_worker: bool,

    #[serde(default)]
    pub scheduling: SchedulingPolicy,
}

impl Default for TrainJobSpec {
    fn default() -> Self {
        Self {
            replica_groups: BTreeMap::new(),
            backoff_limit: None,
            active_deadline_seconds: None,
            enable_dynamic_worker: false,
            scheduling: SchedulingPolicy::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Default, JsonSchema)]
pub struct ReplicaStatus {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum JobConditionType {
    Created,
    Running,
    Restarting,
    Succeeded,
    Failed,
}

impl JobConditionType {
    /// Once either of these is the last condition, the job is terminal
    /// (Invariant 4, §3) and no further conditions may be appended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobConditionType::Succeeded | JobConditionType::Failed)
    }
}

impl fmt::Display for JobConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobConditionType::Created => write!(f, "Created"),
            JobConditionType::Running => write!(f, "Running"),
            JobConditionType::Restarting => write!(f, "Restarting"),
            JobConditionType::Succeeded => write!(f, "Succeeded"),
            JobConditionType::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub type_: JobConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition_time: Time,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct TrainJobStatus {
    #[serde(default)]
    pub replica_statuses: BTreeMap<ReplicaType, ReplicaStatus>,
    #[serde(default)]
    pub conditions: Vec<JobCondition>,
    pub start_time: Option<Time>,
    pub completion_time: Option<Time>,
}

impl TrainJobStatus {
    /// Last condition's type defines the job's current phase (Invariant 4).
    pub fn phase(&self) -> Option<JobConditionType> {
        self.conditions.last().map(|c| c.type_)
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_some_and(|p| p.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_type_round_trips_through_display_and_from_str() {
        for t in ReplicaType::ALL {
            let parsed: ReplicaType = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
    }

    #[test]
    fn only_chief_and_master_are_master_eligible() {
        assert!(ReplicaType::Chief.is_master_eligible());
        assert!(ReplicaType::Master.is_master_eligible());
        assert!(!ReplicaType::Worker.is_master_eligible());
        assert!(!ReplicaType::PS.is_master_eligible());
        assert!(!ReplicaType::Evaluator.is_master_eligible());
    }

    #[test]
    fn exit_code_policy_maps_to_pod_level_never() {
        assert_eq!(RestartPolicy::ExitCode.pod_restart_policy(), "Never");
        assert_eq!(RestartPolicy::OnFailure.pod_restart_policy(), "OnFailure");
        assert_eq!(RestartPolicy::Always.pod_restart_policy(), "Always");
        assert_eq!(RestartPolicy::Never.pod_restart_policy(), "Never");
    }

    #[test]
    fn status_phase_is_last_condition() {
        let mut status = TrainJobStatus::default();
        assert_eq!(status.phase(), None);
        status.conditions.push(JobCondition {
            type_: JobConditionType::Created,
            status: true,
            reason: "JobCreated".into(),
            message: String::new(),
            last_transition_time: Time(k8s_openapi::jiff::Timestamp::now()),
        });
        assert_eq!(status.phase(), Some(JobConditionType::Created));
        assert!(!status.is_terminal());
        status.conditions.push(JobCondition {
            type_: JobConditionType::Succeeded,
            status: true,
            reason: "Worker0Completed".into(),
            message: String::new(),
            last_transition_time: Time(k8s_openapi::jiff::Timestamp::now()),
        });
        assert!(status.is_terminal());
    }
}
