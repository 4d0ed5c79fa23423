use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares the resources that every namespace labeled with this class must
/// contain.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "namespaceclass.akuity.io",
    version = "v1alpha1",
    kind = "NamespaceClass",
    status = "NamespaceClassStatus",
    shortname = "nsclass"
)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceClassSpec {
    /// Raw Kubernetes objects (e.g. NetworkPolicy, ServiceAccount) to create
    /// in each namespace using this class. Any `metadata.namespace` is
    /// replaced with the target namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "embedded_resources")]
    pub resources: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceClassStatus {
    /// The resources that were applied by the last completed reconciliation.
    /// Always serialized so that a merge patch can clear it.
    #[serde(default)]
    #[schemars(schema_with = "embedded_resources")]
    pub last_applied_resources: Vec<serde_json::Value>,
}

impl NamespaceClass {
    pub fn last_applied(&self) -> &[serde_json::Value] {
        self.status
            .as_ref()
            .map(|s| s.last_applied_resources.as_slice())
            .unwrap_or_default()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .iter()
            .flatten()
            .any(|f| f == crate::labels::FINALIZER)
    }

    /// Adds the controller's finalizer, returning false if it was already
    /// present.
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(crate::labels::FINALIZER.to_string());
        true
    }

    /// Removes the controller's finalizer, returning false if it was absent.
    pub fn remove_finalizer(&mut self) -> bool {
        let Some(finalizers) = self.metadata.finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != crate::labels::FINALIZER);
        before != finalizers.len()
    }
}

fn embedded_resources(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-embedded-resource": true,
            "x-kubernetes-preserve-unknown-fields": true,
        },
    }))
    .expect("embedded resources schema must be valid")
}
