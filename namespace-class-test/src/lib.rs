#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Helpers for tests that run against a cluster with the controller and its
//! CRD installed.

use maplit::{btreemap, convert_args};
use namespace_class_controller_k8s_api::{
    self as k8s, labels, NamespaceClass, NamespaceClassSpec, ResourceExt,
};
use std::time::Duration;
use tracing::Instrument;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a test with a random namespace and class name. The namespace and
/// class are deleted on test completion.
pub async fn with_temp_ns<F, Fut>(test: F)
where
    F: FnOnce(kube::Client, String, String) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let _tracing = init_tracing();

    let suffix = random_suffix(6);
    let namespace = format!("namespace-class-test-{suffix}");
    let class = format!("test-class-{suffix}");

    tracing::debug!("initializing client");
    let client = kube::Client::try_default()
        .await
        .expect("failed to initialize k8s client");
    let api = kube::Api::<k8s::Namespace>::all(client.clone());

    tracing::debug!(%namespace, "creating");
    let ns = k8s::Namespace {
        metadata: k8s::ObjectMeta {
            name: Some(namespace.clone()),
            labels: Some(convert_args!(btreemap!(
                "namespace-class-test" => std::thread::current().name().unwrap_or(""),
            ))),
            ..Default::default()
        },
        ..Default::default()
    };
    api.create(&k8s::PostParams::default(), &ns)
        .await
        .expect("failed to create Namespace");

    tracing::trace!("spawning");
    let test = test(client.clone(), namespace.clone(), class.clone());
    let res = tokio::spawn(test.instrument(tracing::info_span!("test", %namespace))).await;
    if res.is_err() {
        drop(_tracing);
    }

    tracing::debug!(%namespace, "deleting");
    api.delete(&namespace, &kube::api::DeleteParams::background())
        .await
        .expect("failed to delete Namespace");
    let classes = kube::Api::<NamespaceClass>::all(client);
    if let Ok(Some(mut nc)) = classes.get_opt(&class).await {
        // Release the finalizer so the class does not outlive the test.
        if nc.remove_finalizer() {
            let _ = classes.replace(&class, &Default::default(), &nc).await;
        }
        let _ = classes.delete(&class, &Default::default()).await;
    }
    if let Err(err) = res {
        std::panic::resume_unwind(err.into_panic());
    }
}

pub async fn create_class(
    client: &kube::Client,
    name: &str,
    resources: Vec<serde_json::Value>,
) -> NamespaceClass {
    kube::Api::<NamespaceClass>::all(client.clone())
        .create(
            &k8s::PostParams::default(),
            &NamespaceClass::new(name, NamespaceClassSpec { resources }),
        )
        .await
        .expect("failed to create NamespaceClass")
}

/// Replaces the class's resources, retrying on conflicting writes from the
/// controller.
pub async fn set_resources(client: &kube::Client, name: &str, resources: Vec<serde_json::Value>) {
    let api = kube::Api::<NamespaceClass>::all(client.clone());
    for _ in 0..5 {
        let mut class = api.get(name).await.expect("failed to get NamespaceClass");
        class.spec.resources = resources.clone();
        match api.replace(name, &k8s::PostParams::default(), &class).await {
            Ok(_) => return,
            Err(kube::Error::Api(e)) if e.code == 409 => continue,
            Err(error) => panic!("failed to update NamespaceClass: {error}"),
        }
    }
    panic!("failed to update NamespaceClass after repeated conflicts");
}

pub async fn delete_class(client: &kube::Client, name: &str) {
    kube::Api::<NamespaceClass>::all(client.clone())
        .delete(name, &k8s::DeleteParams::default())
        .await
        .expect("failed to delete NamespaceClass");
}

/// Sets the class reference label and the given annotations on `namespace`.
pub async fn assign_class(
    client: &kube::Client,
    namespace: &str,
    class: &str,
    annotations: &[(&str, &str)],
) {
    let annotations = annotations
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
        .collect::<serde_json::Map<_, _>>();
    let mut ns_labels = serde_json::Map::new();
    ns_labels.insert(labels::CLASS_NAME_LABEL.to_string(), class.into());
    let patch = serde_json::json!({
        "metadata": {
            "labels": ns_labels,
            "annotations": annotations,
        }
    });
    kube::Api::<k8s::Namespace>::all(client.clone())
        .patch(
            namespace,
            &k8s::PatchParams::default(),
            &k8s::Patch::Merge(patch),
        )
        .await
        .expect("failed to label Namespace");
}

pub fn config_map(name: &str, value: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name },
        "data": { "value": value },
    })
}

/// Polls the ConfigMap until `f` is satisfied by its current state.
pub async fn await_config_map(
    client: &kube::Client,
    namespace: &str,
    name: &str,
    f: impl Fn(Option<&k8s_openapi::api::core::v1::ConfigMap>) -> bool,
) {
    let api = kube::Api::<k8s_openapi::api::core::v1::ConfigMap>::namespaced(
        client.clone(),
        namespace,
    );
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        let cm = api.get_opt(name).await.expect("failed to get ConfigMap");
        if f(cm.as_ref()) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for ConfigMap {namespace}/{name}: {cm:?}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Polls until the class has been removed from the cluster.
pub async fn await_class_deleted(client: &kube::Client, name: &str) {
    let api = kube::Api::<NamespaceClass>::all(client.clone());
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    while let Some(class) = api.get_opt(name).await.expect("failed to get NamespaceClass") {
        if tokio::time::Instant::now() > deadline {
            panic!(
                "timed out waiting for NamespaceClass {} to be deleted",
                class.name_any()
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub fn data(cm: Option<&k8s_openapi::api::core::v1::ConfigMap>) -> Option<&str> {
    cm?.data.as_ref()?.get("value").map(String::as_str)
}

pub fn random_suffix(len: usize) -> String {
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "namespace_class=trace,debug".parse().unwrap()),
            )
            .finish(),
    )
}
