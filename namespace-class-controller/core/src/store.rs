//! The cluster state the reconciler reads from and writes to.

use namespace_class_controller_k8s_api::{DynamicObject, GroupVersionKind, Namespace, NamespaceClass};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The write carried a stale resource version.
    #[error("conflicting write to {0}")]
    Conflict(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// Typed access to namespaces, classes and arbitrary namespaced objects.
///
/// Every call is expected to complete or fail within a bounded time. Reads
/// return `Ok(None)` when the object does not exist.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Lists namespaces whose reference label names `class`.
    async fn namespaces_for_class(&self, class: &str) -> Result<Vec<Namespace>>;

    async fn get_class(&self, name: &str) -> Result<Option<NamespaceClass>>;

    /// Replaces the class's metadata and spec. The class's resource version
    /// must match the stored one.
    async fn replace_class(&self, class: &NamespaceClass) -> Result<NamespaceClass>;

    /// Writes only the class's status.
    async fn replace_class_status(&self, class: &NamespaceClass) -> Result<NamespaceClass>;

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn create_object(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replaces an existing object. `obj` must carry the resource version
    /// that was read.
    async fn replace_object(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Deletes an object, returning false if it did not exist.
    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool>;
}
