//! Opaque resource templates embedded in a `NamespaceClass`.

use namespace_class_controller_k8s_api::{DynamicObject, GroupVersionKind};
use std::fmt;

/// The identity of a template: the object it resolves to, independent of the
/// namespace it is applied to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// A parsed template, ready to be applied into a namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    id: TemplateId,
    gvk: GroupVersionKind,
    object: DynamicObject,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("embedded resource must be a JSON object")]
    NotAnObject,

    #[error("embedded resource is missing {0}")]
    MissingField(&'static str),

    #[error("invalid apiVersion {0:?}")]
    InvalidApiVersion(String),

    #[error("failed to decode embedded resource: {0}")]
    Decode(#[from] serde_json::Error),
}

// === impl TemplateId ===

impl TemplateId {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Reads only the identity of a raw template. Succeeds for templates
    /// whose body would otherwise fail to decode.
    pub fn of(raw: &serde_json::Value) -> Result<Self, Error> {
        let fields = raw.as_object().ok_or(Error::NotAnObject)?;
        let api_version =
            non_empty_str(fields.get("apiVersion")).ok_or(Error::MissingField("apiVersion"))?;
        let kind = non_empty_str(fields.get("kind")).ok_or(Error::MissingField("kind"))?;
        let name = non_empty_str(fields.get("metadata").and_then(|m| m.get("name")))
            .ok_or(Error::MissingField("metadata.name"))?;
        Ok(Self::new(api_version, kind, name))
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.api_version, self.kind, self.name)
    }
}

// === impl Template ===

impl Template {
    pub fn parse(raw: &serde_json::Value) -> Result<Self, Error> {
        let id = TemplateId::of(raw)?;
        let gvk = parse_gvk(&id.api_version, &id.kind)?;
        let object = serde_json::from_value::<DynamicObject>(raw.clone())?;
        Ok(Self { id, gvk, object })
    }

    pub fn id(&self) -> &TemplateId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn kind(&self) -> &str {
        &self.id.kind
    }

    pub fn api_version(&self) -> &str {
        &self.id.api_version
    }

    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// Builds the object this template describes inside `namespace`.
    ///
    /// Any namespace set on the template is overwritten, and server-managed
    /// metadata is cleared so the object can be created or replaced.
    pub fn to_object(&self, namespace: &str) -> DynamicObject {
        let mut obj = self.object.clone();
        obj.metadata.namespace = Some(namespace.to_string());
        obj.metadata.resource_version = None;
        obj.metadata.uid = None;
        obj.metadata.creation_timestamp = None;
        obj.metadata.managed_fields = None;
        obj.metadata.generation = None;
        obj.metadata.self_link = None;
        obj.metadata.deletion_timestamp = None;
        obj.metadata.deletion_grace_period_seconds = None;
        obj.metadata.owner_references = None;
        obj
    }
}

/// Parses every raw template, preserving order. Each entry fails
/// independently.
pub fn parse_all<'a>(
    raws: impl IntoIterator<Item = &'a serde_json::Value>,
) -> impl Iterator<Item = Result<Template, Error>> {
    raws.into_iter().map(Template::parse)
}

fn non_empty_str(v: Option<&serde_json::Value>) -> Option<&str> {
    v.and_then(serde_json::Value::as_str).filter(|s| !s.is_empty())
}

fn parse_gvk(api_version: &str, kind: &str) -> Result<GroupVersionKind, Error> {
    match api_version.split_once('/') {
        None => Ok(GroupVersionKind::gvk("", api_version, kind)),
        Some((group, version))
            if !group.is_empty() && !version.is_empty() && !version.contains('/') =>
        {
            Ok(GroupVersionKind::gvk(group, version, kind))
        }
        Some(_) => Err(Error::InvalidApiVersion(api_version.to_string())),
    }
}
