//! # Pod Specification
//!
//! Turns a cluster declaration and a pod index into the pod that runs one
//! streaming server node. Everything here is pure; the order of the
//! generated arguments is stable.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use kube::{Resource, ResourceExt};

use crate::crds::{NatsStreamingCluster, ServerConfig, StoreKind};

/// Image used when neither the declaration nor its template names one.
pub const DEFAULT_IMAGE: &str = "nats-streaming:0.10.2";

pub const APP_LABEL: &str = "app";
pub const APP_NAME: &str = "nats-streaming";
pub const CLUSTER_LABEL: &str = "stan_cluster";

pub const CONTAINER_NAME: &str = "stan";
pub const SERVER_BINARY: &str = "/nats-streaming-server";

pub const NATS_SCHEME: &str = "nats";
pub const NATS_CLIENT_PORT: u16 = 4222;
pub const MONITORING_PORT: u16 = 8222;

/// Store directory relative to the container's working dir, used when the
/// declaration has no `storeDir`.
pub const DEFAULT_STORE_DIR: &str = "store";

const DEFAULT_RESTART_POLICY: &str = "OnFailure";

/// Labels every pod of the named cluster carries.
pub fn cluster_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), APP_NAME.to_string()),
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
    ])
}

/// Label selector matching [`cluster_labels`].
pub fn label_selector(cluster_name: &str) -> String {
    format!("{APP_LABEL}={APP_NAME},{CLUSTER_LABEL}={cluster_name}")
}

/// Build the pod for node `index` of `cluster`.
///
/// The template's metadata and pod-level fields are kept; namespace, owner
/// reference, labels and the `stan` container are always set by the
/// operator. `bootstrap` marks the node that seeds a new Raft group.
pub fn build_pod(
    cluster: &NatsStreamingCluster,
    index: usize,
    bootstrap: bool,
    default_image: &str,
) -> Pod {
    let pod_name = cluster.pod_name(index);

    let (mut metadata, mut spec) = match &cluster.spec.template {
        Some(template) => (
            template.metadata.clone().unwrap_or_default(),
            template.spec.clone().unwrap_or_default(),
        ),
        None => (Default::default(), PodSpec::default()),
    };

    metadata.name = Some(pod_name.clone());
    metadata.namespace = cluster.namespace();
    metadata.owner_references = cluster.controller_owner_ref(&()).map(|owner| vec![owner]);
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(cluster_labels(&cluster.name_any()));

    if spec.restart_policy.as_deref().map_or(true, str::is_empty) {
        spec.restart_policy = Some(DEFAULT_RESTART_POLICY.to_string());
    }

    let mut container = spec.containers.first().cloned().unwrap_or_default();
    container.name = CONTAINER_NAME.to_string();
    match cluster.spec.configured_image() {
        Some(image) => container.image = Some(image.to_string()),
        None if container.image.as_deref().map_or(true, str::is_empty) => {
            container.image = Some(default_image.to_string());
        }
        None => {}
    }
    container.command = Some(server_command(cluster, &pod_name, bootstrap));

    match spec.containers.first_mut() {
        Some(first) => *first = container,
        None => spec.containers.push(container),
    }

    Pod {
        metadata,
        spec: Some(spec),
        ..Default::default()
    }
}

/// Command line of the server running as `pod_name`.
pub fn server_command(cluster: &NatsStreamingCluster, pod_name: &str, bootstrap: bool) -> Vec<String> {
    let spec = &cluster.spec;
    let no_config = ServerConfig::default();
    let config = spec.config.as_ref().unwrap_or(&no_config);

    let mut args = vec![
        SERVER_BINARY.to_string(),
        "-cluster_id".to_string(),
        cluster.name_any(),
        "-nats_server".to_string(),
        format!("{NATS_SCHEME}://{}:{NATS_CLIENT_PORT}", spec.nats_service),
        "-m".to_string(),
        MONITORING_PORT.to_string(),
    ];

    args.extend(store_args(cluster, pod_name));

    if config.debug {
        args.push("-SD".to_string());
    }
    if config.trace {
        args.push("-SV".to_string());
    }
    if config.raft_logging {
        args.push("--cluster_raft_logging".to_string());
    }

    if let Some(config_file) = spec.config_file() {
        args.push("-sc".to_string());
        args.push(config_file.to_string());
    }

    // A single node has no group to bootstrap into.
    if bootstrap && spec.effective_size() > 1 && spec.uses_raft() {
        args.push("-cluster_bootstrap".to_string());
    }

    args
}

fn store_args(cluster: &NatsStreamingCluster, pod_name: &str) -> Vec<String> {
    let spec = &cluster.spec;

    let mut args = vec!["-store".to_string()];
    match spec.store {
        StoreKind::Sql => {
            args.push("SQL".to_string());
            return args;
        }
        StoreKind::Memory => {
            args.push("MEMORY".to_string());
            return args;
        }
        StoreKind::File => args.push("file".to_string()),
    }

    if spec.uses_raft() {
        args.push("-clustered".to_string());
        args.push(format!("--cluster_node_id={pod_name:?}"));
    }

    let raft_log_path = spec
        .raft_log_path()
        .map(|path| format!("{path}/{pod_name}"));

    match (spec.store_dir(), spec.ft_group()) {
        // FT pairs share the first pod's directory, which also lets a
        // cluster switch from clustered to FT mode without moving data.
        (Some(store_dir), Some(ft_group)) => {
            args.push("-dir".to_string());
            args.push(format!("{store_dir}/{}", cluster.pod_name(1)));
            args.push(format!("--ft_group={ft_group}"));
        }
        (Some(store_dir), None) => {
            args.push("-dir".to_string());
            args.push(format!("{store_dir}/{pod_name}"));
            args.push("--cluster_log_path".to_string());
            args.push(raft_log_path.unwrap_or_else(|| format!("{store_dir}/raft/{pod_name}")));
        }
        (None, _) => {
            args.push("-dir".to_string());
            args.push(DEFAULT_STORE_DIR.to_string());
            if let Some(path) = raft_log_path.filter(|_| spec.uses_raft()) {
                args.push("--cluster_log_path".to_string());
                args.push(path);
            }
        }
    }

    args
}
