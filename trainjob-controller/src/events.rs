//! EventSink collaborator (§6): structured Kubernetes events plus the
//! reconcile metrics counters, wrapped behind one narrow trait so the
//! replica/job reconcilers never touch `kube::runtime::events::Recorder`
//! or `prometheus` directly.

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use trainjob_types::TrainJob;

pub const REASON_SETTED_POD_TEMPLATE_RESTART_POLICY: &str = "SettedPodTemplateRestartPolicy";
pub const REASON_SETTED_POD_TEMPLATE_SCHEDULER_NAME: &str = "SettedPodTemplateSchedulerName";
pub const REASON_EXITED_WITH_CODE: &str = "ExitedWithCode";
pub const REASON_TRAIN_JOB_FAILED: &str = "TrainJobFailed";
pub const REASON_FAILED_MARSHAL_TRAIN_JOB: &str = "FailedMarshalTrainJob";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        }
    }
}

pub trait EventSink: Send + Sync {
    async fn event(&self, job: &TrainJob, kind: EventKind, reason: &str, message: String);
    fn record_jobs_deleted(&self);
    /// Bumps `trainjob_reconcile_total` for one reconcile invocation.
    fn record_reconcile(&self, name: &str, namespace: &str);
    /// Bumps `trainjob_reconcile_action_total` for the action this tick took.
    fn record_action(&self, name: &str, namespace: &str, action: &str);
    /// Observes `trainjob_reconcile_read_seconds` for the decision phase.
    fn observe_read(&self, name: &str, namespace: &str, action: &str, seconds: f64);
    /// Observes `trainjob_reconcile_write_seconds` for the apply phase.
    fn observe_write(&self, name: &str, namespace: &str, action: &str, seconds: f64);
}

#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
    #[cfg(feature = "metrics")]
    metrics: crate::util::metrics::ControllerMetrics,
}

impl KubeEventSink {
    #[cfg(feature = "metrics")]
    pub fn new(client: Client, metrics: crate::util::metrics::ControllerMetrics) -> Self {
        Self { client, metrics }
    }

    #[cfg(not(feature = "metrics"))]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl EventSink for KubeEventSink {
    async fn event(&self, job: &TrainJob, kind: EventKind, reason: &str, message: String) {
        let reference = job.object_ref(&());
        let recorder = Recorder::new(
            self.client.clone(),
            Reporter {
                controller: "trainjob-controller".into(),
                instance: None,
            },
        );
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: kind.into(),
                    reason: reason.into(),
                    note: Some(message),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &reference,
            )
            .await
        {
            eprintln!(
                "failed to publish event {reason} for {}/{}: {e}",
                job.namespace().unwrap_or_default(),
                job.name_any()
            );
        }
    }

    fn record_jobs_deleted(&self) {
        #[cfg(feature = "metrics")]
        self.metrics.jobs_deleted_total.inc();
    }

    fn record_reconcile(&self, name: &str, namespace: &str) {
        #[cfg(feature = "metrics")]
        self.metrics.reconcile_counter.with_label_values(&[name, namespace]).inc();
    }

    fn record_action(&self, name: &str, namespace: &str, action: &str) {
        #[cfg(feature = "metrics")]
        self.metrics.action_counter.with_label_values(&[name, namespace, action]).inc();
    }

    fn observe_read(&self, name: &str, namespace: &str, action: &str, seconds: f64) {
        #[cfg(feature = "metrics")]
        self.metrics.read_histogram.with_label_values(&[name, namespace, action]).observe(seconds);
    }

    fn observe_write(&self, name: &str, namespace: &str, action: &str, seconds: f64) {
        #[cfg(feature = "metrics")]
        self.metrics.write_histogram.with_label_values(&[name, namespace, action]).observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_maps_to_kube_event_type() {
        assert!(matches!(EventType::from(EventKind::Normal), EventType::Normal));
        assert!(matches!(EventType::from(EventKind::Warning), EventType::Warning));
    }
}
