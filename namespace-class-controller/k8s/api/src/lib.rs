#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod namespace_class;

pub use self::namespace_class::{NamespaceClass, NamespaceClassSpec, NamespaceClassStatus};
pub use k8s_openapi::{
    api::core::v1::{Namespace, ObjectReference},
    apimachinery::pkg::apis::meta::v1::Time,
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta},
    Client, CustomResourceExt, Error, Resource, ResourceExt,
};
