//! Well-known label, annotation and finalizer keys.

use crate::Namespace;
use kube::ResourceExt;

/// Label on a namespace naming the `NamespaceClass` it uses.
pub const CLASS_NAME_LABEL: &str = "namespaceclass.akuity.io/name";

/// Annotation on a namespace that opts into deleting every injected resource
/// when the referenced class is deleted.
pub const CLEANUP_ANNOTATION: &str = "namespaceclass.akuity.io/cleanup";

/// Annotation on a namespace that opts into deleting resources dropped from
/// the referenced class's resource list.
pub const CLEANUP_OBSOLETE_ANNOTATION: &str = "namespaceclass.akuity.io/cleanup-obsolete";

/// Finalizer held on a `NamespaceClass` until its namespaces are cleaned up.
pub const FINALIZER: &str = "namespaceclass.akuity.io/finalizer";

/// Returns the class named by the namespace's reference label, if any.
///
/// An empty label value is treated as absent.
pub fn class_name(ns: &Namespace) -> Option<&str> {
    ns.labels()
        .get(CLASS_NAME_LABEL)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

/// Label selector matching namespaces that reference `class`.
pub fn class_selector(class: &str) -> String {
    format!("{CLASS_NAME_LABEL}={class}")
}

pub fn cleanup_enabled(ns: &Namespace) -> bool {
    annotation_enabled(ns, CLEANUP_ANNOTATION)
}

pub fn cleanup_obsolete_enabled(ns: &Namespace) -> bool {
    annotation_enabled(ns, CLEANUP_OBSOLETE_ANNOTATION)
}

// Only the literal "true" opts in. Anything else, including "True" or "yes",
// leaves resources in place.
fn annotation_enabled(ns: &Namespace, key: &str) -> bool {
    ns.annotations().get(key).map(String::as_str) == Some("true")
}
