//! Topology Encoder (§4.C): builds the `TF_CONFIG` JSON injected into every
//! pod so ranks can discover their cluster role and peer addresses.

use serde::Serialize;
use std::collections::BTreeMap;
use trainjob_types::ReplicaType;

#[derive(Debug, Serialize, PartialEq, Eq)]
struct TfConfig {
    cluster: BTreeMap<String, Vec<String>>,
    task: Task,
    environment: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Task {
    #[serde(rename = "type")]
    ty: String,
    index: usize,
}

/// Addresses per replica-type, indexed by replica slot (`addrs[i]` is the
/// host:port for replica `i`, or `None` if that slot isn't up yet).
pub type Cluster = BTreeMap<ReplicaType, Vec<Option<String>>>;

/// Encodes `TF_CONFIG` for one pod at `(self_type, self_index)`. Returns
/// `None` when the job has a single worker and no Chief/Master declared —
/// in that degenerate case the runtime expects no `TF_CONFIG` at all (§4.C
/// edge case), matching the upstream encoder's empty-string behavior.
pub fn encode(cluster: &Cluster, self_type: ReplicaType, self_index: usize) -> Option<String> {
    let single_worker_no_master = !cluster.keys().any(|ty| ty.is_master_eligible())
        && cluster.get(&ReplicaType::Worker).map(Vec::len) == Some(1);
    if single_worker_no_master {
        return None;
    }

    let mut by_type = BTreeMap::new();
    for (ty, addrs) in cluster {
        let known: Vec<String> = addrs
            .iter()
            .filter_map(|addr| addr.clone())
            .collect();
        if !known.is_empty() {
            by_type.insert(ty.as_lowercase().to_string(), known);
        }
    }

    let config = TfConfig {
        cluster: by_type,
        task: Task {
            ty: self_type.as_lowercase().to_string(),
            index: self_index,
        },
        environment: "cloud".to_string(),
    };
    Some(serde_json::to_string(&config).expect("TfConfig always serializes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with(entries: &[(ReplicaType, &[&str])]) -> Cluster {
        entries
            .iter()
            .map(|(ty, addrs)| {
                (
                    *ty,
                    addrs.iter().map(|a| Some(a.to_string())).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn encodes_cluster_and_task_for_a_worker() {
        let cluster = cluster_with(&[
            (ReplicaType::Chief, &["job-chief-0:2222"]),
            (ReplicaType::Worker, &["job-worker-0:2222", "job-worker-1:2222"]),
        ]);
        let encoded = encode(&cluster, ReplicaType::Worker, 1).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["task"]["type"], "worker");
        assert_eq!(value["task"]["index"], 1);
        assert_eq!(value["cluster"]["chief"][0], "job-chief-0:2222");
        assert_eq!(value["cluster"]["worker"][1], "job-worker-1:2222");
        assert_eq!(value["environment"], "cloud");
    }

    #[test]
    fn single_worker_with_no_master_type_produces_no_tf_config() {
        let cluster = cluster_with(&[(ReplicaType::Worker, &["job-worker-0:2222"])]);
        assert_eq!(encode(&cluster, ReplicaType::Worker, 0), None);
    }

    #[test]
    fn single_worker_with_a_chief_still_produces_tf_config() {
        let cluster = cluster_with(&[
            (ReplicaType::Chief, &["job-chief-0:2222"]),
            (ReplicaType::Worker, &["job-worker-0:2222"]),
        ]);
        assert!(encode(&cluster, ReplicaType::Worker, 0).is_some());
    }

    #[test]
    fn unknown_addresses_are_omitted_not_nulled() {
        let cluster: Cluster = BTreeMap::from([(
            ReplicaType::Worker,
            vec![Some("job-worker-0:2222".to_string()), None],
        )]);
        let encoded = encode(&cluster, ReplicaType::Worker, 0).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["cluster"]["worker"].as_array().unwrap().len(), 1);
    }
}
