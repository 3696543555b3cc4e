//! Replica Indexer (§4.B): groups observed pods/services by replica-type
//! and slot-index, detecting duplicates and gaps.

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use trainjob_common::labels;
use trainjob_types::ReplicaType;

/// `slots[i]` holds every pod claiming `replica-index == i` for the given
/// type. Length is `max(replicas, max_observed_index + 1)` so stray
/// overflow pods (e.g. left over from a scale-down) are still visible to
/// the caller instead of being silently dropped.
pub fn index_pods(pods: &[Pod], ty: ReplicaType, replicas: u32) -> Vec<Vec<Pod>> {
    index_by_type(pods, ty, replicas, |p| p.labels(), |p| p.clone())
}

pub fn index_services(services: &[Service], ty: ReplicaType, replicas: u32) -> Vec<Vec<Service>> {
    index_by_type(services, ty, replicas, |s| s.labels(), |s| s.clone())
}

fn index_by_type<T>(
    items: &[T],
    ty: ReplicaType,
    replicas: u32,
    labels_of: impl Fn(&T) -> &std::collections::BTreeMap<String, String>,
    clone_item: impl Fn(&T) -> T,
) -> Vec<Vec<T>> {
    let mut by_index: Vec<Vec<T>> = (0..replicas as usize).map(|_| Vec::new()).collect();
    for item in items {
        let item_labels = labels_of(item);
        let Some(type_label) = item_labels.get(labels::REPLICA_TYPE) else {
            continue;
        };
        if type_label.parse::<ReplicaType>() != Ok(ty) {
            continue;
        }
        let Some(index_label) = item_labels.get(labels::REPLICA_INDEX) else {
            eprintln!("skipping item with missing replica-index label for type {ty}");
            continue;
        };
        let Ok(index) = index_label.parse::<usize>() else {
            eprintln!("skipping item with non-integer replica-index label '{index_label}' for type {ty}");
            continue;
        };
        if index >= by_index.len() {
            by_index.resize_with(index + 1, Vec::new);
        }
        by_index[index].push(clone_item(item));
    }
    by_index
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod_with_labels(ty: &str, index: &str) -> Pod {
        let mut labels = BTreeMap::new();
        labels.insert(labels::REPLICA_TYPE.to_string(), ty.to_string());
        labels.insert(labels::REPLICA_INDEX.to_string(), index.to_string());
        Pod {
            metadata: ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn indexes_pods_into_declared_slots() {
        let pods = vec![
            pod_with_labels("worker", "0"),
            pod_with_labels("worker", "1"),
            pod_with_labels("ps", "0"),
        ];
        let slots = index_pods(&pods, ReplicaType::Worker, 2);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].len(), 1);
        assert_eq!(slots[1].len(), 1);
    }

    #[test]
    fn grows_past_declared_replicas_for_overflow_pods() {
        let pods = vec![pod_with_labels("worker", "5")];
        let slots = index_pods(&pods, ReplicaType::Worker, 2);
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[5].len(), 1);
        assert!(slots[0].is_empty());
    }

    #[test]
    fn duplicate_pods_in_a_slot_are_both_retained() {
        let pods = vec![pod_with_labels("worker", "0"), pod_with_labels("worker", "0")];
        let slots = index_pods(&pods, ReplicaType::Worker, 1);
        assert_eq!(slots[0].len(), 2);
    }

    #[test]
    fn pods_without_an_index_label_are_skipped_not_panicking() {
        let mut labels = BTreeMap::new();
        labels.insert(labels::REPLICA_TYPE.to_string(), "worker".to_string());
        let pod = Pod {
            metadata: ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        let slots = index_pods(&[pod], ReplicaType::Worker, 1);
        assert_eq!(slots[0].len(), 0);
    }

    #[test]
    fn pods_of_another_type_are_excluded() {
        let pods = vec![pod_with_labels("ps", "0")];
        let slots = index_pods(&pods, ReplicaType::Worker, 1);
        assert_eq!(slots[0].len(), 0);
    }
}
