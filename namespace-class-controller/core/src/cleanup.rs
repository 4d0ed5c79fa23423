//! Deletes resources that a class no longer requires.

use crate::{
    events::{self, Events},
    store::{self, Store},
    template::{Template, TemplateId},
};
use ahash::AHashSet as HashSet;
use namespace_class_controller_k8s_api::{labels, Namespace, NamespaceClass, ResourceExt};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct PruneReport {
    pub deleted: Vec<TemplateId>,
    pub failed: Vec<(TemplateId, store::Error)>,
}

/// Summarizes a class's deletion across its namespaces.
#[derive(Debug, Default)]
pub struct FinalizeReport {
    /// Namespaces that opted into cleanup.
    pub cleaned: Vec<String>,
    /// Namespaces that were left untouched and warned.
    pub orphaned: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

#[derive(Debug)]
pub struct DeleteFailure {
    pub namespace: String,
    pub id: TemplateId,
    pub error: store::Error,
}

/// Deletes the objects for `removed` templates from `ns`, if the namespace
/// opts into obsolete-resource cleanup. Otherwise nothing is deleted.
pub async fn prune_obsolete<S: Store + ?Sized>(
    store: &S,
    ns: &Namespace,
    removed: &[Template],
) -> PruneReport {
    let mut report = PruneReport::default();
    if removed.is_empty() {
        return report;
    }

    let namespace = ns.name_any();
    if !labels::cleanup_obsolete_enabled(ns) {
        debug!(%namespace, obsolete = removed.len(), "Leaving obsolete resources in place");
        return report;
    }

    for tpl in removed {
        match delete(store, tpl, &namespace).await {
            Ok(()) => report.deleted.push(tpl.id().clone()),
            Err(error) => {
                warn!(%namespace, kind = %tpl.kind(), name = %tpl.name(), %error, "Failed to delete obsolete resource");
                report.failed.push((tpl.id().clone(), error));
            }
        }
    }
    report
}

/// Handles the deletion of `class` for each namespace that references it.
///
/// Namespaces annotated for cleanup have every resource the class declared
/// or last applied deleted; the others are left untouched and receive an
/// orphaned-class warning. Every namespace is attempted even when some
/// deletions fail.
pub async fn finalize<S, E>(
    store: &S,
    events: &E,
    class: &NamespaceClass,
    namespaces: &[Namespace],
) -> FinalizeReport
where
    S: Store + ?Sized,
    E: Events + ?Sized,
{
    let class_name = class.name_any();
    let templates = declared_templates(class);

    let mut report = FinalizeReport::default();
    for ns in namespaces {
        let namespace = ns.name_any();
        if !labels::cleanup_enabled(ns) {
            info!(%namespace, class = %class_name, "Skipping cleanup; annotation not set");
            events
                .warn(
                    ns,
                    events::ORPHANED_NAMESPACE_CLASS,
                    format!(
                        "Namespace references deleted NamespaceClass '{class_name}' but does not have cleanup enabled"
                    ),
                )
                .await;
            report.orphaned.push(namespace);
            continue;
        }

        for tpl in &templates {
            if let Err(error) = delete(store, tpl, &namespace).await {
                warn!(%namespace, kind = %tpl.kind(), name = %tpl.name(), %error, "Failed to delete resource");
                report.failed.push(DeleteFailure {
                    namespace: namespace.clone(),
                    id: tpl.id().clone(),
                    error,
                });
            }
        }
        report.cleaned.push(namespace);
    }
    report
}

/// The class's spec templates followed by any last-applied templates with
/// an identity not in the spec. Malformed entries are dropped.
fn declared_templates(class: &NamespaceClass) -> Vec<Template> {
    let mut seen = HashSet::new();
    class
        .spec
        .resources
        .iter()
        .chain(class.last_applied())
        .filter_map(|raw| match Template::parse(raw) {
            Ok(tpl) => Some(tpl),
            Err(error) => {
                debug!(%error, "Ignoring malformed resource during cleanup");
                None
            }
        })
        .filter(|tpl| seen.insert(tpl.id().clone()))
        .collect()
}

async fn delete<S: Store + ?Sized>(
    store: &S,
    tpl: &Template,
    namespace: &str,
) -> store::Result<()> {
    if store
        .delete_object(tpl.gvk(), namespace, tpl.name())
        .await?
    {
        info!(%namespace, kind = %tpl.kind(), name = %tpl.name(), "Deleted resource");
    } else {
        debug!(%namespace, kind = %tpl.kind(), name = %tpl.name(), "Resource already deleted");
    }
    Ok(())
}

impl FinalizeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
