//! # Pod Lifecycle Actions
//!
//! Creating and deleting pods through a [`PodBackend`]. "Already exists"
//! and "not found" are treated as success since notifications can be
//! redelivered and passes can race on the same deterministic names.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, PodBackend};
use crate::crds::NatsStreamingCluster;
use crate::pod::build_pod;

pub async fn create_pod(backend: &dyn PodBackend, pod: &Pod) -> Result<(), BackendError> {
    let namespace = pod.namespace().unwrap_or_default();
    match backend.create_pod(&namespace, pod).await {
        Err(error) if error.is_already_exists() => {
            debug!(pod = %pod.name_any(), "Pod already exists");
            Ok(())
        }
        result => result,
    }
}

pub async fn delete_pod(backend: &dyn PodBackend, pod: &Pod) -> Result<(), BackendError> {
    let namespace = pod.namespace().unwrap_or_default();
    match backend.delete_pod(&namespace, &pod.name_any()).await {
        Err(error) if error.is_not_found() => {
            debug!(pod = %pod.name_any(), "Pod already absent");
            Ok(())
        }
        result => result,
    }
}

/// Create node 1 with the bootstrap flag. Returns the pod name.
pub async fn create_bootstrap_pod(
    backend: &dyn PodBackend,
    cluster: &NatsStreamingCluster,
    default_image: &str,
) -> Result<String, BackendError> {
    let pod = build_pod(cluster, 1, true, default_image);
    let name = pod.name_any();

    info!(
        "Creating bootstrap pod '{}/{}'",
        cluster.namespace().unwrap_or_default(),
        name
    );
    if let Err(err) = create_pod(backend, &pod).await {
        error!("Failed to create bootstrap pod {name}: {err}");
        return Err(err);
    }

    Ok(name)
}

/// Create up to `count` pods whose names are free, scanning indices from the
/// cluster size down to 1. Returns the names of the pods created.
///
/// Failures are logged and skipped so the rest of the batch still lands;
/// the skipped pod is retried on the next pass.
pub async fn create_missing_pods(
    backend: &dyn PodBackend,
    cluster: &NatsStreamingCluster,
    count: usize,
    default_image: &str,
) -> Vec<String> {
    let namespace = cluster.namespace().unwrap_or_default();

    let mut pending = Vec::new();
    let mut index = cluster.spec.effective_size();
    while pending.len() < count && index > 0 {
        let name = cluster.pod_name(index);
        match backend.get_pod(&namespace, &name).await {
            Ok(Some(_)) => {}
            Ok(None) => pending.push(build_pod(cluster, index, false, default_image)),
            Err(err) => {
                // The create below resolves whether the name is taken.
                debug!(pod = %name, "Could not look up pod: {err}");
                pending.push(build_pod(cluster, index, false, default_image));
            }
        }
        index -= 1;
    }

    let mut created = Vec::with_capacity(pending.len());
    for pod in pending {
        let name = pod.name_any();
        info!("Creating pod '{namespace}/{name}'");
        match create_pod(backend, &pod).await {
            Ok(()) => created.push(name),
            Err(err) => error!("Failed to create replica pod {name}: {err}"),
        }
    }

    created
}

/// Delete up to `count` pods, walking `pods` from the back. The first pod
/// of the listing is never deleted. Returns how many pods were removed.
//
// TODO: the protected pod is whatever the API lists first, which is not
// guaranteed to be the bootstrap node. Needs a product decision before
// selecting by name or leadership instead.
pub async fn shrink(backend: &dyn PodBackend, pods: &[Pod], count: usize) -> usize {
    let mut deleted = 0;
    for pod in pods.iter().skip(1).rev() {
        if deleted == count {
            break;
        }

        info!(
            "Deleting pod '{}/{}'",
            pod.namespace().unwrap_or_default(),
            pod.name_any()
        );
        match delete_pod(backend, pod).await {
            Ok(()) => deleted += 1,
            Err(err) => warn!("Failed to delete pod {}: {err}", pod.name_any()),
        }
    }

    deleted
}
