//! Namespaced object access used by the workload controllers
//!
//! Production code goes through `KubeObjectApi`, a thin wrapper over
//! `kube::Api`. Tests use `MockObjectApi`, which keeps objects in memory and
//! journals every write for assertions.
//!
//! Writes use `replace`, which sends the `resourceVersion` that was read. A
//! concurrent modification therefore comes back as `ApiError::Conflict` and is
//! handed to the caller instead of being retried here.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("object not found")]
    NotFound,

    #[error("object was modified concurrently: {0}")]
    Conflict(String),

    #[error("Kubernetes API error: {0}")]
    Kube(kube::Error),
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => ApiError::NotFound,
            kube::Error::Api(resp) if resp.code == 409 => {
                ApiError::Conflict(resp.message.clone())
            }
            _ => ApiError::Kube(err),
        }
    }
}

#[async_trait]
pub trait ObjectApi<K>: Send + Sync {
    /// Fetch an object, `Ok(None)` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ApiError>;

    async fn create(&self, namespace: &str, object: &K) -> Result<K, ApiError>;

    /// Replace an object; fails with `Conflict` when `object` is stale
    async fn replace(&self, namespace: &str, name: &str, object: &K) -> Result<K, ApiError>;
}

/// `ObjectApi` backed by the Kubernetes API server
pub struct KubeObjectApi<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeObjectApi<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> ObjectApi<K> for KubeObjectApi<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ApiError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, object: &K) -> Result<K, ApiError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn replace(&self, namespace: &str, name: &str, object: &K) -> Result<K, ApiError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.replace(name, &PostParams::default(), object).await?)
    }
}

/// Shared, ordered log of side effects across test doubles
#[cfg(test)]
#[derive(Clone, Default)]
pub struct Journal {
    entries: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Position of the first entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// In-memory `ObjectApi` keyed by `(namespace, name)`
#[cfg(test)]
pub struct MockObjectApi<K> {
    objects: std::sync::Mutex<std::collections::BTreeMap<(String, String), K>>,
    journal: Journal,
    conflict_on_replace: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl<K> MockObjectApi<K>
where
    K: Resource + Clone + Send + Sync,
{
    pub fn new(journal: Journal) -> Self {
        Self {
            objects: std::sync::Mutex::new(std::collections::BTreeMap::new()),
            journal,
            conflict_on_replace: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Seed an object; namespace and name are taken from its metadata
    pub fn insert(&self, object: K) {
        let meta = object.meta();
        let key = (
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        );
        self.objects.lock().unwrap().insert(key, object);
    }

    pub fn stored(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make every following `replace` fail as if the object had changed
    pub fn fail_replace_with_conflict(&self) {
        self.conflict_on_replace
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Writes recorded by this api, e.g. `create demo-primary`
    pub fn writes(&self) -> Vec<String> {
        self.journal
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("create ") || e.starts_with("replace "))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl<K> ObjectApi<K> for MockObjectApi<K>
where
    K: Resource + Clone + Send + Sync,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ApiError> {
        Ok(self.stored(namespace, name))
    }

    async fn create(&self, namespace: &str, object: &K) -> Result<K, ApiError> {
        let name = object.meta().name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(ApiError::Conflict(format!("{name} already exists")));
        }
        objects.insert(key, object.clone());
        self.journal.record(format!("create {name}"));
        Ok(object.clone())
    }

    async fn replace(&self, namespace: &str, name: &str, object: &K) -> Result<K, ApiError> {
        if self
            .conflict_on_replace
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(ApiError::Conflict(format!(
                "the object {name} has been modified; please apply your changes to the latest version"
            )));
        }
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&key) {
            return Err(ApiError::NotFound);
        }
        objects.insert(key, object.clone());
        self.journal.record(format!("replace {name}"));
        Ok(object.clone())
    }
}
