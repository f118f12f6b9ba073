//! # Custom Resource Definitions
//!
//! The `NatsStreamingCluster` resource users author to declare a NATS
//! Streaming cluster, plus the derived views the reconciler relies on.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Size used when a declaration omits `size`. Clustering is done via Raft,
/// so an odd number of nodes is recommended.
pub const DEFAULT_CLUSTER_SIZE: i32 = 3;

/// NatsStreamingCluster CRD - desired state of one streaming cluster
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "streaming.nats.io",
    version = "v1alpha1",
    kind = "NatsStreamingCluster",
    plural = "natsstreamingclusters",
    shortname = "stanclusters",
    derive = "Default",
    namespaced,
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Store", "type":"string", "jsonPath":".spec.store"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NatsStreamingClusterSpec {
    /// Number of nodes in the cluster
    #[serde(default = "default_size")]
    pub size: i32,

    /// Image override for the server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Kubernetes service of the NATS server the nodes connect to
    #[serde(rename = "natsSvc")]
    pub nats_service: String,

    /// Storage backend
    #[serde(default)]
    pub store: StoreKind,

    /// Path of a server configuration file mounted into the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,

    /// Base pod the generated pods are derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,

    /// Clustering and diagnostics options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ServerConfig>,
}

fn default_size() -> i32 {
    DEFAULT_CLUSTER_SIZE
}

impl Default for NatsStreamingClusterSpec {
    fn default() -> Self {
        Self {
            size: DEFAULT_CLUSTER_SIZE,
            image: None,
            nats_service: String::new(),
            store: StoreKind::default(),
            config_file: None,
            template: None,
            config: None,
        }
    }
}

/// Storage backend of the streaming server
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    #[serde(alias = "FILE", alias = "")]
    File,

    #[serde(alias = "MEMORY")]
    Memory,

    #[serde(alias = "SQL")]
    Sql,
}

/// Clustering, fault tolerance and diagnostics options
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Enables `-SD`
    pub debug: bool,

    /// Enables `-SV`
    pub trace: bool,

    /// Enables `--cluster_raft_logging`
    pub raft_logging: bool,

    /// Base directory for raft logs, one subdirectory per node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raft_log_path: Option<String>,

    /// Base directory for the file store, usually a persistent volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<String>,

    /// Fault tolerance group; replaces Raft clustering when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ft_group: Option<String>,

    /// Forces clustering even for a single node
    pub clustered: bool,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|value| !value.is_empty())
}

impl NatsStreamingClusterSpec {
    /// Size the reconciler converges to. The SQL store cannot fan out, and
    /// a cluster always has at least one node.
    pub fn effective_size(&self) -> usize {
        if self.store == StoreKind::Sql || self.size < 1 {
            1
        } else {
            self.size as usize
        }
    }

    pub fn configured_image(&self) -> Option<&str> {
        non_empty(self.image.as_ref())
    }

    pub fn config_file(&self) -> Option<&str> {
        non_empty(self.config_file.as_ref())
    }

    pub fn ft_group(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|config| non_empty(config.ft_group.as_ref()))
    }

    pub fn store_dir(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|config| non_empty(config.store_dir.as_ref()))
    }

    pub fn raft_log_path(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|config| non_empty(config.raft_log_path.as_ref()))
    }

    /// Whether the declaration asks for more than a standalone node.
    pub fn is_clustered(&self) -> bool {
        let forced = self.config.as_ref().is_some_and(|config| config.clustered);
        self.effective_size() > 1 || forced
    }

    /// Whether nodes join a Raft group: file store, clustered, and not
    /// paired through an FT group.
    pub fn uses_raft(&self) -> bool {
        self.store == StoreKind::File && self.is_clustered() && self.ft_group().is_none()
    }
}

impl NatsStreamingCluster {
    /// Stable identity of the declaration. Falls back to `namespace/name`
    /// for objects that were never persisted.
    pub fn identity(&self) -> String {
        self.uid().unwrap_or_else(|| {
            format!(
                "{}/{}",
                self.namespace().unwrap_or_default(),
                self.name_any()
            )
        })
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Deterministic name of the pod at `index` (1-based).
    pub fn pod_name(&self, index: usize) -> String {
        format!("{}-{}", self.name_any(), index)
    }
}
