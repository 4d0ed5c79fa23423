use crate::{
    controller::{self, Backoff, Context},
    core::Reconciler,
    events::KubeEvents,
    k8s::{self, labels, Api, CustomResourceExt, NamespaceClass},
    metrics::ReconcileMetrics,
    store::KubeStore,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use kube::runtime::{controller::Config, watcher, Controller};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::watch, time::Duration};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "namespace-class-controller",
    about = "Applies NamespaceClass resources to the namespaces that reference them"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "namespace_class=info,warn",
        env = "NAMESPACE_CLASS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The maximum number of objects each controller reconciles concurrently.
    #[clap(long, default_value = "4")]
    workers: u16,

    /// Bounds each request to the Kubernetes API.
    #[clap(long, default_value = "5000")]
    request_timeout_ms: u64,

    #[clap(long, default_value = "500")]
    retry_min_ms: u64,

    #[clap(long, default_value = "60000")]
    retry_max_ms: u64,

    /// Identifies this controller on published events and status writes.
    #[clap(long, default_value = "namespace-class-controller")]
    controller_name: String,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Prints the NamespaceClass CustomResourceDefinition as YAML.
    Crd,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            workers,
            request_timeout_ms,
            retry_min_ms,
            retry_max_ms,
            controller_name,
            command,
        } = self;

        if let Some(Command::Crd) = command {
            print!("{}", serde_yaml::to_string(&NamespaceClass::crd())?);
            return Ok(());
        }

        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        if retry_min_ms > retry_max_ms {
            bail!("--retry-min-ms must not exceed --retry-max-ms");
        }

        let mut prom = <Registry>::default();
        let metrics = ReconcileMetrics::register(prom.sub_registry_with_prefix("namespace_class"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let store = KubeStore::new(
            client.clone(),
            Duration::from_millis(request_timeout_ms),
            controller_name.clone(),
        );
        let events = KubeEvents::new(client.clone(), controller_name);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stopped = {
            let mut shutdown = shutdown_rx.clone();
            async move {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            }
            .boxed()
            .shared()
        };
        let ctx = Arc::new(Context::new(
            Reconciler::new(store, events),
            Backoff::new(
                Duration::from_millis(retry_min_ms),
                Duration::from_millis(retry_max_ms),
            ),
            metrics,
            shutdown_rx,
        ));
        let config = Config::default().concurrency(workers);

        // Spawn controllers. Namespaces are only watched while they carry the
        // class label.

        let namespaces = Controller::new(
            Api::<k8s::Namespace>::all(client.clone()),
            watcher::Config::default().labels(labels::CLASS_NAME_LABEL),
        )
        .with_config(config.clone())
        .graceful_shutdown_on(stopped.clone())
        .run(controller::reconcile, controller::error_policy, ctx.clone())
        .for_each(controller::log_result("Namespace"))
        .instrument(info_span!("namespaces"));

        let classes = Controller::new(
            Api::<NamespaceClass>::all(client),
            watcher::Config::default(),
        )
        .with_config(config)
        .graceful_shutdown_on(stopped)
        .run(controller::reconcile, controller::error_policy, ctx)
        .for_each(controller::log_result("NamespaceClass"))
        .instrument(info_span!("namespaceclasses"));

        let controllers = tokio::spawn(async move {
            tokio::join!(namespaces, classes);
            info!("Controllers stopped");
        });

        // On shutdown, cancel in-flight reconciles and hold the drain until
        // both controllers have stopped.
        let drain = runtime.shutdown_handle();
        tokio::spawn(async move {
            let release = drain.signaled().await;
            info!("Stopping reconciles");
            let _ = shutdown_tx.send(true);
            let _ = release.release_after(controllers).await;
        });

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
