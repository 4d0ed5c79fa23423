use crate::{
    events::Events,
    reconcile::{Key, Reconciler},
    store::{self, Store},
};
use ahash::AHashSet as HashSet;
use maplit::btreemap;
use namespace_class_controller_k8s_api::{
    labels, DynamicObject, GroupVersionKind, Namespace, NamespaceClass, NamespaceClassSpec,
    NamespaceClassStatus, ObjectMeta, ResourceExt, Time,
};
use parking_lot::Mutex;
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc};


type TestReconciler = Reconciler<MemStore, RecordedEvents>;

/// An in-memory cluster that enforces resource versions the way the API
/// server does.
#[derive(Clone, Default)]
pub(crate) struct MemStore(Arc<Mutex<State>>);

#[derive(Default)]
struct State {
    version: u64,
    namespaces: BTreeMap<String, Namespace>,
    classes: BTreeMap<String, NamespaceClass>,
    objects: BTreeMap<ObjectKey, DynamicObject>,
    failing_objects: HashSet<String>,
    fail_namespace_list: bool,
    fail_status: bool,
    status_writes: usize,
    class_writes: usize,
}

// Versions of a kind are views of the same stored object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    group: String,
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Clone, Default)]
pub(crate) struct RecordedEvents(Arc<Mutex<Vec<Warning>>>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Warning {
    pub namespace: String,
    pub reason: &'static str,
    pub note: String,
}

// === impl MemStore ===

impl MemStore {
    pub fn with(namespaces: Vec<Namespace>, classes: Vec<NamespaceClass>) -> Self {
        let store = Self::default();
        for ns in namespaces {
            store.put_namespace(ns);
        }
        for class in classes {
            store.put_class(class);
        }
        store
    }

    pub fn put_namespace(&self, mut ns: Namespace) {
        let mut state = self.0.lock();
        ns.metadata.resource_version = Some(state.next_version());
        state.namespaces.insert(ns.name_any(), ns);
    }

    pub fn put_class(&self, mut class: NamespaceClass) {
        let mut state = self.0.lock();
        class.metadata.resource_version = Some(state.next_version());
        state.classes.insert(class.name_any(), class);
    }

    /// Places an object in the store as if a user had created it.
    pub fn put_object(&self, raw: serde_json::Value, namespace: &str) {
        let mut obj = serde_json::from_value::<DynamicObject>(raw).expect("object must decode");
        obj.metadata.namespace = Some(namespace.to_string());
        let mut state = self.0.lock();
        obj.metadata.resource_version = Some(state.next_version());
        state.objects.insert(ObjectKey::of(&obj), obj);
    }

    pub fn class(&self, name: &str) -> Option<NamespaceClass> {
        self.0.lock().classes.get(name).cloned()
    }

    /// Edits a stored class's spec, as a user would.
    pub fn set_resources(&self, name: &str, resources: Vec<serde_json::Value>) {
        let mut state = self.0.lock();
        let version = state.next_version();
        let class = state.classes.get_mut(name).expect("class must exist");
        class.spec.resources = resources;
        class.metadata.resource_version = Some(version);
    }

    /// Marks a stored class for deletion, as the API server does when a
    /// class holding finalizers is deleted.
    pub fn mark_deleted(&self, name: &str) {
        let mut state = self.0.lock();
        let version = state.next_version();
        let class = state.classes.get_mut(name).expect("class must exist");
        class.metadata.deletion_timestamp = Some(deletion_time());
        class.metadata.resource_version = Some(version);
    }

    /// Returns the ConfigMaps in `namespace`, ordered by name.
    pub fn config_maps(&self, namespace: &str) -> Vec<DynamicObject> {
        self.0
            .lock()
            .objects
            .iter()
            .filter(|(k, _)| k.group.is_empty() && k.kind == "ConfigMap" && k.namespace == namespace)
            .map(|(_, o)| o.clone())
            .collect()
    }

    pub fn config_map_names(&self, namespace: &str) -> Vec<String> {
        self.config_maps(namespace)
            .iter()
            .map(ResourceExt::name_any)
            .collect()
    }

    /// Fails every write to objects named `name`.
    pub fn fail_object(&self, name: &str) {
        self.0.lock().failing_objects.insert(name.to_string());
    }

    pub fn heal_object(&self, name: &str) {
        self.0.lock().failing_objects.remove(name);
    }

    pub fn fail_namespace_list(&self) {
        self.0.lock().fail_namespace_list = true;
    }

    pub fn fail_status(&self) {
        self.0.lock().fail_status = true;
    }

    pub fn status_writes(&self) -> usize {
        self.0.lock().status_writes
    }

    pub fn class_writes(&self) -> usize {
        self.0.lock().class_writes
    }
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn check_object_write(&self, name: &str) -> store::Result<()> {
        if self.failing_objects.contains(name) {
            return Err(store::Error::Api(anyhow::anyhow!("injected failure for {name}")));
        }
        Ok(())
    }
}

impl ObjectKey {
    fn new(gvk: &GroupVersionKind, namespace: &str, name: &str) -> Self {
        Self {
            group: gvk.group.clone(),
            kind: gvk.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn of(obj: &DynamicObject) -> Self {
        let types = obj.types.as_ref().expect("object must have type metadata");
        let group = types
            .api_version
            .split_once('/')
            .map(|(g, _)| g)
            .unwrap_or_default();
        Self {
            group: group.to_string(),
            kind: types.kind.clone(),
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn get_namespace(&self, name: &str) -> store::Result<Option<Namespace>> {
        Ok(self.0.lock().namespaces.get(name).cloned())
    }

    async fn namespaces_for_class(&self, class: &str) -> store::Result<Vec<Namespace>> {
        let state = self.0.lock();
        if state.fail_namespace_list {
            return Err(store::Error::Api(anyhow::anyhow!("injected list failure")));
        }
        Ok(state
            .namespaces
            .values()
            .filter(|ns| labels::class_name(ns) == Some(class))
            .cloned()
            .collect())
    }

    async fn get_class(&self, name: &str) -> store::Result<Option<NamespaceClass>> {
        Ok(self.0.lock().classes.get(name).cloned())
    }

    async fn replace_class(&self, class: &NamespaceClass) -> store::Result<NamespaceClass> {
        let mut state = self.0.lock();
        let name = class.name_any();
        let stored = state
            .classes
            .get(&name)
            .ok_or_else(|| store::Error::Api(anyhow::anyhow!("{name} not found")))?;
        if stored.metadata.resource_version != class.metadata.resource_version {
            return Err(store::Error::Conflict(name));
        }

        let mut updated = class.clone();
        updated.status = stored.status.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.class_writes += 1;

        let released = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().map_or(true, Vec::is_empty);
        if released {
            state.classes.remove(&name);
        } else {
            state.classes.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn replace_class_status(&self, class: &NamespaceClass) -> store::Result<NamespaceClass> {
        let mut state = self.0.lock();
        if state.fail_status {
            return Err(store::Error::Api(anyhow::anyhow!("injected status failure")));
        }
        let name = class.name_any();
        let version = state.next_version();
        let stored = state
            .classes
            .get_mut(&name)
            .ok_or_else(|| store::Error::Api(anyhow::anyhow!("{name} not found")))?;
        stored.status = class.status.clone();
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();
        state.status_writes += 1;
        Ok(updated)
    }

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> store::Result<Option<DynamicObject>> {
        Ok(self
            .0
            .lock()
            .objects
            .get(&ObjectKey::new(gvk, namespace, name))
            .cloned())
    }

    async fn create_object(
        &self,
        _gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> store::Result<DynamicObject> {
        let mut state = self.0.lock();
        state.check_object_write(&obj.name_any())?;
        let key = ObjectKey::of(obj);
        if state.objects.contains_key(&key) {
            return Err(store::Error::AlreadyExists(obj.name_any()));
        }
        let mut created = obj.clone();
        created.metadata.resource_version = Some(state.next_version());
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn replace_object(
        &self,
        _gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> store::Result<DynamicObject> {
        let mut state = self.0.lock();
        state.check_object_write(&obj.name_any())?;
        let key = ObjectKey::of(obj);
        let stored = state
            .objects
            .get(&key)
            .ok_or_else(|| store::Error::Api(anyhow::anyhow!("{} not found", obj.name_any())))?;
        // Unlike the API server, writes without a version are rejected too.
        if obj.metadata.resource_version.is_none()
            || stored.metadata.resource_version != obj.metadata.resource_version
        {
            return Err(store::Error::Conflict(obj.name_any()));
        }
        let mut updated = obj.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> store::Result<bool> {
        let mut state = self.0.lock();
        state.check_object_write(name)?;
        Ok(state
            .objects
            .remove(&ObjectKey::new(gvk, namespace, name))
            .is_some())
    }
}

// === impl RecordedEvents ===

impl RecordedEvents {
    pub fn warnings(&self) -> Vec<Warning> {
        self.0.lock().clone()
    }

    pub fn warnings_for(&self, namespace: &str) -> Vec<Warning> {
        self.warnings()
            .into_iter()
            .filter(|w| w.namespace == namespace)
            .collect()
    }
}

#[async_trait::async_trait]
impl Events for RecordedEvents {
    async fn warn(&self, ns: &Namespace, reason: &'static str, note: String) {
        self.0.lock().push(Warning {
            namespace: ns.name_any(),
            reason,
            note,
        });
    }
}

// === helpers ===

fn mk_reconciler(store: &MemStore) -> (TestReconciler, RecordedEvents) {
    let events = RecordedEvents::default();
    (Reconciler::new(store.clone(), events.clone()), events)
}

fn mk_ns(name: &str, class: Option<&str>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: class.map(|c| btreemap! { labels::CLASS_NAME_LABEL.to_string() => c.to_string() }),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn annotate(mut ns: Namespace, key: &str, value: &str) -> Namespace {
    ns.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    ns
}

fn mk_class(name: &str, resources: Vec<serde_json::Value>) -> NamespaceClass {
    NamespaceClass::new(name, NamespaceClassSpec { resources })
}

fn mk_deleted_class(name: &str, resources: Vec<serde_json::Value>) -> NamespaceClass {
    let mut class = mk_class(name, resources);
    class.metadata.finalizers = Some(vec![labels::FINALIZER.to_string()]);
    class.metadata.deletion_timestamp = Some(deletion_time());
    class
}

fn with_last_applied(mut class: NamespaceClass, resources: Vec<serde_json::Value>) -> NamespaceClass {
    class.status = Some(NamespaceClassStatus {
        last_applied_resources: resources,
    });
    class
}

fn config_map(name: &str, data: BTreeMap<&str, &str>) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name },
        "data": data,
    })
}

fn data_of(obj: &DynamicObject, key: &str) -> Option<String> {
    obj.data
        .get("data")
        .and_then(|d| d.get(key))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

fn deletion_time() -> Time {
    serde_json::from_value(json!("2025-01-01T00:00:00Z")).expect("timestamp must decode")
}

fn key(name: &str) -> Key {
    Key::cluster(name)
}
