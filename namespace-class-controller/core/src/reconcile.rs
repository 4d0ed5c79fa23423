//! Drives a single reconciliation for a namespace or class name.

use crate::{
    cleanup,
    diff,
    events::{self, Events},
    store::{self, Store},
    template::{Template, TemplateId},
    upsert,
};
use ahash::AHashSet as HashSet;
use namespace_class_controller_k8s_api::{
    labels, Namespace, NamespaceClass, NamespaceClassStatus, ResourceExt,
};
use std::{fmt, future::Future};
use tracing::{debug, info, instrument, warn};

/// Identifies the object that triggered a reconciliation.
///
/// Namespaces and classes are both cluster-scoped, so `namespace` is
/// carried for logging only and never used for lookups. A key without a
/// `kind` is resolved as a namespace first, then as a class.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub name: String,
    pub namespace: Option<String>,
    pub kind: Option<KeyKind>,
}

/// The kind of object a [`Key`] was produced from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyKind {
    Namespace,
    NamespaceClass,
}

#[derive(Clone, Debug)]
pub struct Reconciler<S, E> {
    store: S,
    events: E,
}

/// The path a reconciliation took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The key named a namespace without a class label.
    Unlabeled,
    /// The key named a labeled namespace; the class was applied into it.
    Namespace { class: String, failed: usize },
    /// The key named a class that is being deleted; applying was skipped.
    ClassDeleting { class: String },
    /// The key named neither a namespace nor a class.
    Orphaned { namespaces: usize },
    /// The class was applied to every namespace referencing it.
    Applied {
        namespaces: usize,
        failed: usize,
        pruned: usize,
    },
    /// The class's deletion was handled and its finalizer released.
    Finalized { cleaned: usize, orphaned: usize },
    /// The class is being deleted and holds no finalizer.
    Deleted,
    /// The key named a namespace that no longer exists.
    Gone,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] store::Error),

    #[error("namespace {namespace} references missing NamespaceClass {class}")]
    MissingClass { namespace: String, class: String },

    #[error("failed to delete {failed} resources for NamespaceClass {class}")]
    Cleanup { class: String, failed: usize },

    #[error("reconciliation cancelled")]
    Cancelled,
}

// === impl Key ===

impl Key {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            kind: None,
        }
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        Self {
            kind: Some(KeyKind::Namespace),
            ..Self::cluster(name)
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self {
            kind: Some(KeyKind::NamespaceClass),
            ..Self::cluster(name)
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(KeyKind::Namespace) => f.write_str("Namespace ")?,
            Some(KeyKind::NamespaceClass) => f.write_str("NamespaceClass ")?,
            None => {}
        }
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

// === impl Reconciler ===

impl<S: Store, E: Events> Reconciler<S, E> {
    pub fn new(store: S, events: E) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    /// Reconciles `key`, returning [`Error::Cancelled`] if `cancel` completes
    /// first. In-flight store calls are dropped on cancellation.
    pub async fn reconcile_until(
        &self,
        key: &Key,
        cancel: impl Future<Output = ()>,
    ) -> Result<Outcome, Error> {
        tokio::select! {
            biased;
            () = cancel => Err(Error::Cancelled),
            res = self.reconcile(key) => res,
        }
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn reconcile(&self, key: &Key) -> Result<Outcome, Error> {
        if key.kind != Some(KeyKind::NamespaceClass) {
            if let Some(ns) = self.store.get_namespace(&key.name).await? {
                return self.reconcile_namespace(&ns).await;
            }
            if key.kind == Some(KeyKind::Namespace) {
                debug!(namespace = %key.name, "Namespace no longer exists");
                return Ok(Outcome::Gone);
            }
        }

        match self.store.get_class(&key.name).await? {
            Some(class) => self.reconcile_class(class).await,
            None => self.reconcile_orphans(&key.name).await,
        }
    }

    /// Applies the namespace's class into it.
    async fn reconcile_namespace(&self, ns: &Namespace) -> Result<Outcome, Error> {
        let namespace = ns.name_any();
        let Some(class_name) = labels::class_name(ns) else {
            debug!(%namespace, "Skipping namespace without NamespaceClass label");
            return Ok(Outcome::Unlabeled);
        };

        let Some(class) = self.store.get_class(class_name).await? else {
            warn!(%namespace, class = %class_name, "NamespaceClass not found");
            self.events
                .warn(
                    ns,
                    events::MISSING_NAMESPACE_CLASS,
                    format!("Namespace references missing NamespaceClass '{class_name}'"),
                )
                .await;
            return Err(Error::MissingClass {
                namespace,
                class: class_name.to_string(),
            });
        };

        if class.is_deleting() {
            debug!(%namespace, class = %class_name, "NamespaceClass is being deleted");
            return Ok(Outcome::ClassDeleting {
                class: class_name.to_string(),
            });
        }

        info!(%namespace, class = %class_name, "Applying NamespaceClass");
        let report = upsert::apply_all(&self.store, &class.spec.resources, &namespace).await;
        Ok(Outcome::Namespace {
            class: class_name.to_string(),
            failed: report.failed.len(),
        })
    }

    /// Warns each namespace that still references a class that no longer
    /// exists.
    async fn reconcile_orphans(&self, class: &str) -> Result<Outcome, Error> {
        let namespaces = self.store.namespaces_for_class(class).await?;
        for ns in &namespaces {
            self.events
                .warn(
                    ns,
                    events::ORPHANED_NAMESPACE_CLASS,
                    format!("Namespace references missing NamespaceClass '{class}'"),
                )
                .await;
        }
        if !namespaces.is_empty() {
            info!(%class, namespaces = namespaces.len(), "Namespaces reference a missing NamespaceClass");
        }
        Ok(Outcome::Orphaned {
            namespaces: namespaces.len(),
        })
    }

    async fn reconcile_class(&self, mut class: NamespaceClass) -> Result<Outcome, Error> {
        let name = class.name_any();

        if class.is_deleting() {
            if !class.has_finalizer() {
                return Ok(Outcome::Deleted);
            }
            return self.finalize(class).await;
        }

        if class.add_finalizer() {
            class = self.store.replace_class(&class).await?;
            info!(class = %name, "Added finalizer");
        }

        // Entries that fail to decode still claim their identity, so an
        // invalid edit of a live template never reads as its removal.
        let mut unidentified = 0;
        let current = class
            .spec
            .resources
            .iter()
            .filter_map(|raw| match TemplateId::of(raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    unidentified += 1;
                    None
                }
            })
            .collect::<Vec<_>>();
        let previous = class
            .last_applied()
            .iter()
            .filter_map(|raw| Some((Template::parse(raw).ok()?, raw.clone())))
            .collect::<Vec<_>>();
        let gone = diff::removed(previous.iter().map(|(tpl, _)| tpl.id()), &current);
        let (removed, removed_raws): (Vec<Template>, Vec<serde_json::Value>) = previous
            .into_iter()
            .filter(|(tpl, _)| gone.contains(tpl.id()))
            .unzip();

        let namespaces = self.store.namespaces_for_class(&name).await?;
        info!(class = %name, namespaces = namespaces.len(), obsolete = removed.len(), "Reconciling NamespaceClass");

        // Removed templates stay in the applied record until every opted-in
        // namespace has had its object deleted.
        let mut retained = HashSet::new();
        let prune = unidentified == 0;
        if !prune && !removed.is_empty() {
            warn!(class = %name, unidentified, obsolete = removed.len(), "Deferring obsolete resource cleanup; some resources have no identity");
            retained.extend(removed.iter().map(|tpl| tpl.id().clone()));
        }

        let mut failed = 0;
        let mut pruned = 0;
        for ns in &namespaces {
            let namespace = ns.name_any();
            let applied = upsert::apply_all(&self.store, &class.spec.resources, &namespace).await;
            failed += applied.failed.len();
            if prune {
                let report = cleanup::prune_obsolete(&self.store, ns, &removed).await;
                failed += report.failed.len();
                pruned += report.deleted.len();
                retained.extend(report.failed.into_iter().map(|(id, _)| id));
            }
        }

        let mut record = class.spec.resources.clone();
        record.extend(
            removed
                .iter()
                .zip(removed_raws)
                .filter(|(tpl, _)| retained.contains(tpl.id()))
                .map(|(_, raw)| raw),
        );
        if class.last_applied() != record.as_slice() {
            debug!(class = %name, resources = record.len(), retained = retained.len(), "Recording applied resources");
            class.status = Some(NamespaceClassStatus {
                last_applied_resources: record,
            });
            self.store.replace_class_status(&class).await?;
        }

        Ok(Outcome::Applied {
            namespaces: namespaces.len(),
            failed,
            pruned,
        })
    }

    async fn finalize(&self, mut class: NamespaceClass) -> Result<Outcome, Error> {
        let name = class.name_any();
        info!(class = %name, "Finalizing NamespaceClass deletion");

        let namespaces = self.store.namespaces_for_class(&name).await?;
        let report = cleanup::finalize(&self.store, &self.events, &class, &namespaces).await;
        if !report.is_complete() {
            return Err(Error::Cleanup {
                class: name,
                failed: report.failed.len(),
            });
        }

        class.remove_finalizer();
        self.store.replace_class(&class).await?;
        info!(class = %name, "Finalizer removed, deletion can proceed");

        Ok(Outcome::Finalized {
            cleaned: report.cleaned.len(),
            orphaned: report.orphaned.len(),
        })
    }
}

// === impl Outcome ===

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlabeled => "unlabeled",
            Self::Namespace { .. } => "namespace",
            Self::ClassDeleting { .. } => "class_deleting",
            Self::Orphaned { .. } => "orphaned",
            Self::Applied { .. } => "applied",
            Self::Finalized { .. } => "finalized",
            Self::Deleted => "deleted",
            Self::Gone => "gone",
        }
    }
}

// === impl Error ===

impl Error {
    /// Every reconcile error is resolved by retrying the key later: state is
    /// re-read from the store on each attempt.
    pub fn is_retryable(&self) -> bool {
        true
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store(store::Error::Conflict(_)) => "conflict",
            Self::Store(store::Error::Timeout) => "timeout",
            Self::Store(_) => "store",
            Self::MissingClass { .. } => "missing_class",
            Self::Cleanup { .. } => "cleanup",
            Self::Cancelled => "cancelled",
        }
    }
}
