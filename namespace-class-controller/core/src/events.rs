use namespace_class_controller_k8s_api::Namespace;

/// A namespace references a class that has been deleted or never existed.
pub const ORPHANED_NAMESPACE_CLASS: &str = "OrphanedNamespaceClass";

/// A namespace references a class that could not be found.
pub const MISSING_NAMESPACE_CLASS: &str = "MissingNamespaceClass";

/// Records warnings against namespaces.
///
/// Publishing is fire-and-forget: implementations log failures and never
/// report them to the caller.
#[async_trait::async_trait]
pub trait Events: Send + Sync {
    async fn warn(&self, ns: &Namespace, reason: &'static str, note: String);
}
