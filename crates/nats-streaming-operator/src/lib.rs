//! # NATS Streaming Kubernetes Operator
//!
//! Kubernetes operator for deploying and scaling NATS Streaming clusters.
//! Watches `NatsStreamingCluster` resources and creates, bootstraps and
//! removes the server pods each one declares.

pub mod actions;
pub mod backend;
pub mod cache;
pub mod cli;
pub mod controller;
pub mod crds;
pub mod inventory;
pub mod manager;
pub mod pod;
pub mod reconciler;
pub mod shutdown;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{BackendError, KubeBackend, PodBackend};
pub use cache::ClusterCache;
pub use controller::{ClusterEvent, Controller, ControllerError, Informer};
pub use crds::*;
pub use manager::*;
pub use reconciler::{Outcome, ReconcileError, Reconciler};
pub use shutdown::{Shutdown, ShutdownCause, Signal};

use std::path::PathBuf;
use std::time::Duration;

/// How often every known cluster is reconciled again without a change.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Operator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch; empty watches all namespaces.
    pub namespace: String,
    /// Explicit kubeconfig; in-cluster or `KUBECONFIG` config otherwise.
    pub kubeconfig: Option<PathBuf>,
    pub default_image: String,
    pub resync_interval: Duration,
    /// Install SIGINT/SIGTERM handlers.
    pub handle_signals: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            kubeconfig: None,
            default_image: pod::DEFAULT_IMAGE.to_string(),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            handle_signals: true,
        }
    }
}
