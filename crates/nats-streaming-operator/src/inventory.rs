//! # Pod Inventory
//!
//! Live pods of a cluster, looked up by label selector on every pass.

use k8s_openapi::api::core::v1::Pod;

use crate::backend::{BackendError, PodBackend};
use crate::pod::label_selector;

/// All pods labelled as belonging to cluster `name`.
pub async fn list_pods(
    backend: &dyn PodBackend,
    name: &str,
    namespace: &str,
) -> Result<Vec<Pod>, BackendError> {
    backend.list_pods(namespace, &label_selector(name)).await
}

/// Pods of cluster `name` that are not terminating. Listing order is kept.
pub async fn list_running_pods(
    backend: &dyn PodBackend,
    name: &str,
    namespace: &str,
) -> Result<Vec<Pod>, BackendError> {
    let pods = list_pods(backend, name, namespace).await?;
    Ok(pods
        .into_iter()
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .collect())
}
