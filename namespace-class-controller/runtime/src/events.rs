use crate::{
    core::Events,
    k8s::{self, Namespace, Resource, ResourceExt},
};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

const ACTION: &str = "Reconcile";

/// Publishes warnings as Kubernetes Events on the namespace.
#[derive(Clone)]
pub struct KubeEvents {
    recorder: Recorder,
}

impl KubeEvents {
    pub fn new(client: k8s::Client, controller: String) -> Self {
        let reporter = Reporter {
            controller,
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl Events for KubeEvents {
    async fn warn(&self, ns: &Namespace, reason: &'static str, note: String) {
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(note),
            action: ACTION.to_string(),
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&event, &ns.object_ref(&())).await {
            warn!(namespace = %ns.name_any(), reason, %error, "Failed to publish event");
        }
    }
}
