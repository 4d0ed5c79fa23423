#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use namespace_class_controller_core as core;
pub use namespace_class_controller_k8s_api as k8s;

mod args;
mod controller;
mod events;
mod metrics;
mod store;

pub use self::{
    args::Args,
    controller::{Backoff, Context, Keyed, Retries},
    events::KubeEvents,
    metrics::ReconcileMetrics,
    store::KubeStore,
};
