use crate::{
    core::store::{self, Store},
    k8s::{
        self, labels, Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind,
        ListParams, Namespace, NamespaceClass, Patch, PatchParams, PostParams, ResourceExt,
    },
};
use ahash::AHashMap as HashMap;
use anyhow::anyhow;
use kube::discovery::{self, Scope};
use parking_lot::RwLock;
use std::{future::Future, sync::Arc};
use tokio::time;
use tracing::debug;

/// A [`Store`] backed by the Kubernetes API.
///
/// Every request is bounded by a timeout. Template kinds are resolved through
/// API discovery on first use and cached for the life of the process.
#[derive(Clone)]
pub struct KubeStore {
    client: k8s::Client,
    timeout: time::Duration,
    field_manager: String,
    resources: Arc<RwLock<HashMap<GvkKey, ApiResource>>>,
}

type GvkKey = (String, String, String);

impl KubeStore {
    pub fn new(client: k8s::Client, timeout: time::Duration, field_manager: String) -> Self {
        Self {
            client,
            timeout,
            field_manager,
            resources: Default::default(),
        }
    }

    fn classes(&self) -> Api<NamespaceClass> {
        Api::all(self.client.clone())
    }

    async fn objects(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
    ) -> store::Result<Api<DynamicObject>> {
        let ar = self.api_resource(gvk).await?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, &ar))
    }

    async fn api_resource(&self, gvk: &GroupVersionKind) -> store::Result<ApiResource> {
        let key = (gvk.group.clone(), gvk.version.clone(), gvk.kind.clone());
        let cached = self.resources.read().get(&key).cloned();
        if let Some(ar) = cached {
            return Ok(ar);
        }

        let (ar, caps) = self
            .call(&gvk.kind, discovery::pinned_kind(&self.client, gvk))
            .await?;
        if matches!(caps.scope, Scope::Cluster) {
            return Err(store::Error::Api(anyhow!(
                "{} is cluster-scoped and cannot be applied to a namespace",
                gvk.kind
            )));
        }
        debug!(group = %gvk.group, version = %gvk.version, kind = %gvk.kind, plural = %ar.plural, "Discovered resource");
        self.resources.write().insert(key, ar.clone());
        Ok(ar)
    }

    async fn call<T>(
        &self,
        name: &str,
        fut: impl Future<Output = kube::Result<T>>,
    ) -> store::Result<T> {
        match time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(api_error(error, name)),
            Err(_) => Err(store::Error::Timeout),
        }
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get_namespace(&self, name: &str) -> store::Result<Option<Namespace>> {
        let api = Api::<Namespace>::all(self.client.clone());
        self.call(name, api.get_opt(name)).await
    }

    async fn namespaces_for_class(&self, class: &str) -> store::Result<Vec<Namespace>> {
        let api = Api::<Namespace>::all(self.client.clone());
        let params = ListParams::default().labels(&labels::class_selector(class));
        let list = self.call(class, api.list(&params)).await?;
        Ok(list.items)
    }

    async fn get_class(&self, name: &str) -> store::Result<Option<NamespaceClass>> {
        self.call(name, self.classes().get_opt(name)).await
    }

    async fn replace_class(&self, class: &NamespaceClass) -> store::Result<NamespaceClass> {
        let name = class.name_any();
        let api = self.classes();
        self.call(&name, api.replace(&name, &PostParams::default(), class))
            .await
    }

    async fn replace_class_status(&self, class: &NamespaceClass) -> store::Result<NamespaceClass> {
        let name = class.name_any();
        let api = self.classes();
        let patch = status_patch(class);
        let params = PatchParams::apply(&self.field_manager);
        self.call(&name, api.patch_status(&name, &params, &patch))
            .await
    }

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> store::Result<Option<DynamicObject>> {
        let api = self.objects(gvk, namespace).await?;
        self.call(name, api.get_opt(name)).await
    }

    async fn create_object(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> store::Result<DynamicObject> {
        let name = obj.name_any();
        let api = self.objects(gvk, &obj.namespace().unwrap_or_default()).await?;
        self.call(&name, api.create(&PostParams::default(), obj))
            .await
    }

    async fn replace_object(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> store::Result<DynamicObject> {
        let name = obj.name_any();
        let api = self.objects(gvk, &obj.namespace().unwrap_or_default()).await?;
        self.call(&name, api.replace(&name, &PostParams::default(), obj))
            .await
    }

    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> store::Result<bool> {
        let api = self.objects(gvk, namespace).await?;
        match time::timeout(self.timeout, api.delete(name, &DeleteParams::default())).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(kube::Error::Api(e))) if e.code == 404 => Ok(false),
            Ok(Err(error)) => Err(api_error(error, name)),
            Err(_) => Err(store::Error::Timeout),
        }
    }
}

fn api_error(error: kube::Error, name: &str) -> store::Error {
    match error {
        kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists" => {
            store::Error::AlreadyExists(name.to_string())
        }
        kube::Error::Api(e) if e.code == 409 => store::Error::Conflict(name.to_string()),
        error => store::Error::Api(error.into()),
    }
}

/// Status is written with a merge patch, so the applied list is always sent
/// in full, including when it is empty.
fn status_patch(class: &NamespaceClass) -> Patch<serde_json::Value> {
    Patch::Merge(serde_json::json!({ "status": class.status }))
}
