#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cleanup;
pub mod diff;
pub mod events;
pub mod reconcile;
pub mod store;
pub mod template;
pub mod upsert;

#[cfg(test)]
mod tests;

pub use self::{
    events::Events,
    reconcile::{Error, Key, KeyKind, Outcome, Reconciler},
    store::Store,
    template::{Template, TemplateId},
};
