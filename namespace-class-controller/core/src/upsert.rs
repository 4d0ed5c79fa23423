//! Applies templates into a namespace.

use crate::{
    store::{self, Store},
    template::{self, Template, TemplateId},
};
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

/// The result of applying a class's templates into one namespace.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub created: Vec<TemplateId>,
    pub updated: Vec<TemplateId>,
    pub failed: Vec<Failure>,
}

#[derive(Debug)]
pub struct Failure {
    /// Position of the template in the class's resource list.
    pub index: usize,
    /// Absent when the template could not be parsed.
    pub id: Option<TemplateId>,
    pub error: FailureReason,
}

#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    #[error(transparent)]
    Parse(#[from] template::Error),

    #[error(transparent)]
    Store(#[from] store::Error),
}

/// Creates the template's object in `namespace`, or replaces the existing
/// one while carrying its resource version forward.
pub async fn upsert<S: Store + ?Sized>(
    store: &S,
    template: &Template,
    namespace: &str,
) -> store::Result<Upserted> {
    let mut obj = template.to_object(namespace);
    let gvk = template.gvk();

    match store.get_object(gvk, namespace, template.name()).await? {
        Some(existing) => {
            obj.metadata.resource_version = existing.metadata.resource_version;
            store.replace_object(gvk, &obj).await?;
            Ok(Upserted::Updated)
        }
        None => {
            store.create_object(gvk, &obj).await?;
            Ok(Upserted::Created)
        }
    }
}

/// Applies every raw template into `namespace` in order.
///
/// A template that fails to parse or apply is recorded and skipped; the
/// remaining templates are still attempted.
pub async fn apply_all<S: Store + ?Sized>(
    store: &S,
    raws: &[serde_json::Value],
    namespace: &str,
) -> ApplyReport {
    let mut report = ApplyReport::default();
    for (index, parsed) in template::parse_all(raws).enumerate() {
        let template = match parsed {
            Ok(template) => template,
            Err(error) => {
                warn!(%namespace, index, %error, "Skipping malformed resource");
                report.failed.push(Failure {
                    index,
                    id: None,
                    error: error.into(),
                });
                continue;
            }
        };

        let id = template.id().clone();
        match upsert(store, &template, namespace).await {
            Ok(Upserted::Created) => {
                info!(%namespace, kind = %id.kind, name = %id.name, "Created resource");
                report.created.push(id);
            }
            Ok(Upserted::Updated) => {
                debug!(%namespace, kind = %id.kind, name = %id.name, "Updated resource");
                report.updated.push(id);
            }
            Err(error) => {
                warn!(%namespace, kind = %id.kind, name = %id.name, %error, "Failed to apply resource");
                report.failed.push(Failure {
                    index,
                    id: Some(id),
                    error: error.into(),
                });
            }
        }
    }
    report
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
