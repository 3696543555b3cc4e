//! Gang-scheduling PodGroup (§3, §4.E step 8). Out of scope per §1 as a
//! *resource* ("the gang-scheduler resource (PodGroup)"), but the core
//! still needs a typed handle to sync `minAvailable` against it, so it's
//! modeled minimally here the way the reference operator models `Cluster`
//! and `Shard` as sibling CRDs owned by the same controller binary.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "scheduling.sigs.k8s.io",
    version = "v1alpha1",
    kind = "PodGroup",
    plural = "podgroups",
    namespaced
)]
pub struct PodGroupSpec {
    pub min_available: u32,
}

/// `minAvailable` is the sum of every declared replica group's `replicas`.
pub fn min_available(replica_groups: &std::collections::BTreeMap<trainjob_types::ReplicaType, trainjob_types::ReplicaSpec>) -> u32 {
    replica_groups.values().map(|r| r.replicas).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainjob_types::{ReplicaSpec, ReplicaType, RestartPolicy};

    #[test]
    fn min_available_sums_declared_replicas() {
        let mut groups = std::collections::BTreeMap::new();
        groups.insert(
            ReplicaType::Chief,
            ReplicaSpec {
                replicas: 1,
                template: Default::default(),
                restart_policy: RestartPolicy::Never,
            },
        );
        groups.insert(
            ReplicaType::Worker,
            ReplicaSpec {
                replicas: 3,
                template: Default::default(),
                restart_policy: RestartPolicy::OnFailure,
            },
        );
        assert_eq!(min_available(&groups), 4);
    }
}
