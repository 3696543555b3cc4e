//! Store collaborator (§6): the read side the reconcilers consume —
//! `get_job`/`list_owned_pods`/`list_owned_services`. Implemented directly
//! over `kube::Api` list/get calls rather than a hand-rolled cache; `kube`'s
//! own `Controller` already serves the primary watch loop from its
//! reflector, so this collaborator only needs to expose a narrow read
//! surface, per the composition design note (§9), instead of a controller
//! mixin.
//!
//! Grounded on the reference operator's direct `Api<T>` reads in
//! `clusters/reconcile.rs::determine_action` and the 404-swallowing idiom
//! from `shards/actions.rs::delete_pod`.

use crate::util::Error;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::ListParams;
use kube::{Api, Client, Resource, ResourceExt};
use trainjob_common::labels;
use trainjob_types::TrainJob;

pub trait Store: Send + Sync {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<TrainJob>, Error>;
    async fn list_owned_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>, Error>;
    async fn list_owned_services(&self, namespace: &str, job_name: &str) -> Result<Vec<Service>, Error>;
}

#[derive(Clone)]
pub struct ApiStore {
    client: Client,
}

impl ApiStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Store for ApiStore {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<TrainJob>, Error> {
        let api: Api<TrainJob> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(job) => Ok(Some(job)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_owned_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&format!("{}={}", labels::JOB_NAME, job_name));
        Ok(api.list(&lp).await?.items)
    }

    async fn list_owned_services(&self, namespace: &str, job_name: &str) -> Result<Vec<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&format!("{}={}", labels::JOB_NAME, job_name));
        Ok(api.list(&lp).await?.items)
    }
}

/// True iff `obj` carries an owner reference to `owner_uid`. Pods/Services
/// the core creates always do (Invariant 5, §3); used as a defensive
/// second filter on top of the label selector in case a user hand-crafts a
/// same-labeled object belonging to a different job.
pub fn owned_by_uid<T: Resource>(obj: &T, owner_uid: &str) -> bool {
    obj.owner_references().iter().any(|o| o.uid == owner_uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn pod_owned_by(uid: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                owner_references: Some(vec![OwnerReference { uid: uid.to_string(), ..Default::default() }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn owned_by_uid_matches_on_uid() {
        let pod = pod_owned_by("abc-123");
        assert!(owned_by_uid(&pod, "abc-123"));
        assert!(!owned_by_uid(&pod, "other-uid"));
    }

    #[test]
    fn owned_by_uid_false_when_no_owner_references() {
        assert!(!owned_by_uid(&Pod::default(), "abc-123"));
    }
}
