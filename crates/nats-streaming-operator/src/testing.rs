//! In-memory pod backend and declaration fixtures for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use crate::backend::{BackendError, PodBackend};
use crate::crds::{NatsStreamingCluster, NatsStreamingClusterSpec, ServerConfig, StoreKind};

#[derive(Default)]
struct MemoryState {
    pods: BTreeMap<(String, String), Pod>,
    fail_list: bool,
    fail_create: HashSet<String>,
    fail_delete: HashSet<String>,
    created: Vec<String>,
    deleted: Vec<String>,
}

/// Pod backend keeping pods in a map, listed in name order the way the API
/// server does. Failures can be injected per operation.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `pod` directly, bypassing creation bookkeeping.
    pub fn insert(&self, pod: Pod) {
        let key = (pod.namespace().unwrap_or_default(), pod.name_any());
        self.lock().pods.insert(key, pod);
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Give the pod a deletion timestamp, as if it were terminating.
    pub fn mark_terminating(&self, namespace: &str, name: &str) {
        if let Some(pod) = self
            .lock()
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock()
            .pods
            .remove(&(namespace.to_string(), name.to_string()))
    }

    pub fn fail_list(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    pub fn fail_create(&self, name: &str) {
        self.lock().fail_create.insert(name.to_string());
    }

    pub fn fail_delete(&self, name: &str) {
        self.lock().fail_delete.insert(name.to_string());
    }

    /// Names of pods successfully created, in order.
    pub fn created(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    /// Names of pods successfully deleted, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.labels();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl PodBackend for MemoryBackend {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, BackendError> {
        let state = self.lock();
        if state.fail_list {
            return Err(BackendError::Unavailable("list pods".to_string()));
        }

        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| namespace.is_empty() || ns == namespace)
            .filter(|(_, pod)| matches_selector(pod, selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, BackendError> {
        Ok(self.pod(namespace, name))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), BackendError> {
        let name = pod.name_any();
        let mut state = self.lock();
        if state.fail_create.contains(&name) {
            return Err(BackendError::Unavailable(format!("create pod {name}")));
        }

        let key = (namespace.to_string(), name.clone());
        if state.pods.contains_key(&key) {
            return Err(BackendError::AlreadyExists(name));
        }

        let mut pod = pod.clone();
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.creation_timestamp = Some(Time(Utc::now()));
        state.pods.insert(key, pod);
        state.created.push(name);
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.fail_delete.contains(name) {
            return Err(BackendError::Unavailable(format!("delete pod {name}")));
        }

        match state.pods.remove(&(namespace.to_string(), name.to_string())) {
            Some(_) => {
                state.deleted.push(name.to_string());
                Ok(())
            }
            None => Err(BackendError::NotFound(name.to_string())),
        }
    }
}

/// Declaration in namespace `default` with a uid derived from its name.
pub fn cluster(name: &str, size: i32, store: StoreKind) -> NatsStreamingCluster {
    cluster_with_config(name, size, store, None)
}

pub fn cluster_with_config(
    name: &str,
    size: i32,
    store: StoreKind,
    config: Option<ServerConfig>,
) -> NatsStreamingCluster {
    let mut cluster = NatsStreamingCluster::new(
        name,
        NatsStreamingClusterSpec {
            size,
            nats_service: "nats".to_string(),
            store,
            config,
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some("default".to_string());
    cluster.metadata.uid = Some(format!("uid-{name}"));
    cluster
}

/// Command line of the `stan` container of `pod`.
pub fn command(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|container| container.command.clone())
        .unwrap_or_default()
}
