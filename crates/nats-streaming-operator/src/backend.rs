//! # Pod Backend
//!
//! The seam between the reconciler and the orchestration API. The operator
//! talks to Kubernetes through [`KubeBackend`]; tests use the in-memory
//! backend from [`crate::testing`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::{instrument, Level};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("pod {0} already exists")]
    AlreadyExists(String),

    #[error("pod {0} not found")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl BackendError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Pod operations the reconciler needs. An empty namespace addresses all
/// namespaces.
#[async_trait]
pub trait PodBackend: Send + Sync {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, BackendError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, BackendError>;

    /// Fails with [`BackendError::AlreadyExists`] when the name is taken.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), BackendError>;

    /// Fails with [`BackendError::NotFound`] when the pod is gone.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError>;
}

/// Pod backend backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
}

impl KubeBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

fn classify(error: kube::Error, name: &str) -> BackendError {
    match error {
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            BackendError::AlreadyExists(name.to_string())
        }
        kube::Error::Api(response) if response.code == 404 => BackendError::NotFound(name.to_string()),
        error => BackendError::Kube(error),
    }
}

#[async_trait]
impl PodBackend for KubeBackend {
    #[instrument(skip(self), err(level = Level::WARN))]
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, BackendError> {
        let params = ListParams::default().labels(selector);
        let pods = self.pods(namespace).list(&params).await?;
        Ok(pods.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, BackendError> {
        Ok(self.pods(namespace).get_opt(name).await?)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), BackendError> {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map(|_| ())
            .map_err(|error| classify(error, name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|error| classify(error, name))
    }
}
