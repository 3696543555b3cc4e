//! Mutator collaborator (§6): every blocking write the core performs
//! against the cluster — create/delete Pod and Service, sync PodGroup,
//! commit TrainJob status.
//!
//! Grounded on `shards/actions.rs::{create_pod, delete_pod}` (404-on-delete
//! swallowed, 409-on-create swallowed) and `util/patch.rs::patch_status`.

use crate::gang::PodGroup;
use crate::util::patch::patch_status;
use crate::util::Error;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use trainjob_types::{TrainJob, TrainJobStatus};

pub struct KubeMutator {
    client: Client,
}

impl KubeMutator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), pod).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_service(&self, namespace: &str, svc: &Service) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), svc).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates or patches the job's `PodGroup` so `minAvailable` tracks the
    /// current sum of declared replicas.
    pub async fn sync_pod_group(&self, namespace: &str, group: &PodGroup) -> Result<(), Error> {
        let api: Api<PodGroup> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), group).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                let name = group.metadata.name.as_deref().unwrap_or_default();
                let patch = kube::api::Patch::Merge(serde_json::json!({
                    "spec": { "minAvailable": group.spec.min_available }
                }));
                api.patch(name, &kube::api::PatchParams::default(), &patch)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_pod_group(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<PodGroup> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Commits `status` onto `job` via a JSON-patch diff against the
    /// current snapshot. A stale resourceVersion surfaces as
    /// `kube::Error::Api` with a 409 Conflict, which the caller re-enqueues.
    pub async fn update_job_status(
        &self,
        job: &TrainJob,
        status: TrainJobStatus,
    ) -> Result<TrainJob, Error> {
        patch_status(self.client.clone(), job, move |current: &mut TrainJobStatus| {
            *current = status;
        })
        .await
        .map_err(Error::from)
    }
}
