//! Connects the reconciler to kube-runtime controllers.

use crate::{
    core::{Error, Events, Key, Reconciler, Store},
    k8s::{Namespace, NamespaceClass, ResourceExt},
    metrics::ReconcileMetrics,
};
use ahash::AHashMap as HashMap;
use kube::runtime::{
    controller::{self, Action},
    reflector::{Lookup, ObjectRef},
    watcher,
};
use parking_lot::Mutex;
use std::{future::Future, sync::Arc};
use tokio::{sync::watch, time};
use tracing::{debug, info, warn};

/// Exponential requeue delays for keys that fail repeatedly.
#[derive(Copy, Clone, Debug)]
pub struct Backoff {
    min: time::Duration,
    max: time::Duration,
}

/// Consecutive failure counts per key.
#[derive(Debug)]
pub struct Retries {
    backoff: Backoff,
    failures: Mutex<HashMap<Key, u32>>,
}

/// State shared by every reconcile a controller runs.
pub struct Context<S, E> {
    reconciler: Reconciler<S, E>,
    retries: Retries,
    metrics: ReconcileMetrics,
    shutdown: watch::Receiver<bool>,
}

/// Maps a watched object to the key it is reconciled under.
pub trait Keyed {
    fn key(&self) -> Key;
}

// === impl Backoff ===

impl Backoff {
    pub fn new(min: time::Duration, max: time::Duration) -> Self {
        Self { min, max }
    }

    /// The delay before retrying a key that has failed `failures` times in a
    /// row.
    pub fn delay(&self, failures: u32) -> time::Duration {
        let factor = 1u32
            .checked_shl(failures.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.min.saturating_mul(factor).min(self.max)
    }
}

// === impl Retries ===

impl Retries {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            failures: Default::default(),
        }
    }

    /// Records a failure for `key`, returning the failure count and the delay
    /// before it should be retried.
    pub fn failed(&self, key: &Key) -> (u32, time::Duration) {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_default();
        *count = count.saturating_add(1);
        (*count, self.backoff.delay(*count))
    }

    pub fn reset(&self, key: &Key) {
        self.failures.lock().remove(key);
    }
}

// === impl Context ===

impl<S, E> Context<S, E> {
    pub fn new(
        reconciler: Reconciler<S, E>,
        backoff: Backoff,
        metrics: ReconcileMetrics,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            reconciler,
            retries: Retries::new(backoff),
            metrics,
            shutdown,
        }
    }

    fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut shutdown = self.shutdown.clone();
        async move {
            // A dropped sender also ends in-flight work.
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        }
    }
}

// === impl Keyed ===

impl Keyed for Namespace {
    fn key(&self) -> Key {
        Key::namespace(self.name_any())
    }
}

impl Keyed for NamespaceClass {
    fn key(&self) -> Key {
        Key::class(self.name_any())
    }
}

pub async fn reconcile<K, S, E>(obj: Arc<K>, ctx: Arc<Context<S, E>>) -> Result<Action, Error>
where
    K: Keyed,
    S: Store,
    E: Events,
{
    let key = obj.key();
    let start = time::Instant::now();
    let result = ctx.reconciler.reconcile_until(&key, ctx.cancelled()).await;
    ctx.metrics.observe(&result, start.elapsed());

    let outcome = result?;
    debug!(%key, outcome = outcome.as_str(), "Reconciled");
    ctx.retries.reset(&key);
    Ok(Action::await_change())
}

pub fn error_policy<K, S, E>(obj: Arc<K>, error: &Error, ctx: Arc<Context<S, E>>) -> Action
where
    K: Keyed,
{
    let key = obj.key();
    if !error.is_retryable() {
        warn!(%key, %error, "Reconcile failed");
        ctx.retries.reset(&key);
        return Action::await_change();
    }

    let (failures, delay) = ctx.retries.failed(&key);
    warn!(%key, %error, failures, ?delay, "Reconcile failed; requeueing");
    Action::requeue(delay)
}

/// Logs the errors a controller yields that the error policy does not see.
pub fn log_result<K: Lookup>(
    kind: &'static str,
) -> impl Fn(Result<(ObjectRef<K>, Action), controller::Error<Error, watcher::Error>>) -> std::future::Ready<()>
{
    move |result| {
        match result {
            Ok((obj, action)) => debug!(%kind, name = %obj.name, ?action, "Reconcile finished"),
            Err(controller::Error::ReconcilerFailed(..)) => {}
            Err(controller::Error::ObjectNotFound(obj)) => {
                info!(%kind, name = %obj.name, "Object deleted before reconcile")
            }
            Err(error) => warn!(%kind, %error, "Controller error"),
        }
        std::future::ready(())
    }
}
