//! # Reconciler
//!
//! Compares a cluster declaration with its live pods and decides whether to
//! bootstrap, scale up, scale down or do nothing.

use std::cmp::Ordering;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, instrument, Level};

use crate::actions::{create_bootstrap_pod, create_missing_pods, shrink};
use crate::backend::{BackendError, PodBackend};
use crate::cache::ClusterCache;
use crate::controller::ClusterEvent;
use crate::crds::{NatsStreamingCluster, StoreKind};
use crate::inventory::list_running_pods;

/// What a reconciliation pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The cluster is gone or tombstoned; its cache entry was dropped.
    Removed,
    /// Live pods already match the declaration.
    Converged,
    /// Only the bootstrap pod was created; followers come on a later pass.
    Bootstrapped(String),
    /// Missing pods were created.
    ScaledUp(Vec<String>),
    /// Surplus pods were deleted.
    ScaledDown(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to list pods of cluster {cluster}: {source}")]
    Inventory {
        cluster: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to create bootstrap pod of cluster {cluster}: {source}")]
    Bootstrap {
        cluster: String,
        #[source]
        source: BackendError,
    },
}

/// Reconciler for NatsStreamingCluster resources
pub struct Reconciler {
    backend: Arc<dyn PodBackend>,
    cache: ClusterCache,
    default_image: String,
}

impl Reconciler {
    pub fn new(backend: Arc<dyn PodBackend>, default_image: impl Into<String>) -> Self {
        Self::with_cache(backend, ClusterCache::new(), default_image)
    }

    pub fn with_cache(
        backend: Arc<dyn PodBackend>,
        cache: ClusterCache,
        default_image: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            cache,
            default_image: default_image.into(),
        }
    }

    pub fn cache(&self) -> &ClusterCache {
        &self.cache
    }

    /// Dispatch one notification.
    pub async fn handle(&self, event: ClusterEvent) -> Result<Outcome, ReconcileError> {
        match event {
            ClusterEvent::Added(cluster) => {
                info!(
                    "Adding cluster '{}/{}' (uid={})",
                    cluster.namespace().unwrap_or_default(),
                    cluster.name_any(),
                    cluster.identity()
                );
                self.reconcile(cluster).await
            }
            ClusterEvent::Updated { new, .. } => {
                debug!(
                    "Syncing cluster '{}/{}' (uid={})",
                    new.namespace().unwrap_or_default(),
                    new.name_any(),
                    new.identity()
                );
                self.reconcile(new).await
            }
            ClusterEvent::Deleted(cluster) => {
                info!(
                    "Deleted cluster '{}/{}' (uid={})",
                    cluster.namespace().unwrap_or_default(),
                    cluster.name_any(),
                    cluster.identity()
                );
                self.cache.forget(&cluster.identity());
                Ok(Outcome::Removed)
            }
        }
    }

    /// One reconciliation pass for `cluster`.
    ///
    /// The cache entry is written after the pod actions, whatever their
    /// result, so the first-sight check inside the pass sees the state from
    /// before it.
    #[instrument(
        skip_all,
        fields(name = %cluster.name_any(), namespace = cluster.metadata.namespace),
        ret(level = Level::DEBUG),
        err(level = Level::WARN)
    )]
    pub async fn reconcile(&self, cluster: Arc<NatsStreamingCluster>) -> Result<Outcome, ReconcileError> {
        if cluster.is_marked_for_deletion() {
            // Pods go away through the ownership cascade.
            debug!("Removing {} cluster", cluster.name_any());
            self.cache.forget(&cluster.identity());
            return Ok(Outcome::Removed);
        }

        let outcome = self.converge(&cluster).await;
        self.cache.observe(cluster);
        outcome
    }

    async fn converge(&self, cluster: &NatsStreamingCluster) -> Result<Outcome, ReconcileError> {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        let size = cluster.spec.effective_size();

        let pods = list_running_pods(self.backend.as_ref(), &name, &namespace)
            .await
            .map_err(|source| ReconcileError::Inventory {
                cluster: name.clone(),
                source,
            })?;
        let running = pods.len();

        match running.cmp(&size) {
            Ordering::Equal => {
                debug!("Reconciled '{namespace}/{name}' cluster (size={size}/{size})");
                Ok(Outcome::Converged)
            }
            Ordering::Greater => {
                let surplus = running - size;
                info!(
                    "Too many pods for '{namespace}/{name}' cluster (size={running}/{size}), removing {surplus} pods..."
                );
                let removed = shrink(self.backend.as_ref(), &pods, surplus).await;
                Ok(Outcome::ScaledDown(removed))
            }
            Ordering::Less => {
                let missing = size - running;
                info!(
                    "Missing pods for '{namespace}/{name}' cluster (size={running}/{size}), creating {missing} pods..."
                );

                // SQL and FT clusters have no Raft membership to seed.
                if cluster.spec.store == StoreKind::Sql || cluster.spec.ft_group().is_some() {
                    let created = self.create_missing(cluster, missing).await;
                    return Ok(Outcome::ScaledUp(created));
                }

                // First sight, or every node is gone: seed the group with
                // the bootstrap node alone and leave followers to the next
                // pass, once it is running.
                if !self.cache.contains(&cluster.identity()) || running == 0 {
                    let pod = create_bootstrap_pod(self.backend.as_ref(), cluster, &self.default_image)
                        .await
                        .map_err(|source| ReconcileError::Bootstrap {
                            cluster: name.clone(),
                            source,
                        })?;
                    return Ok(Outcome::Bootstrapped(pod));
                }

                let created = self.create_missing(cluster, missing).await;
                Ok(Outcome::ScaledUp(created))
            }
        }
    }

    async fn create_missing(&self, cluster: &NatsStreamingCluster, count: usize) -> Vec<String> {
        create_missing_pods(self.backend.as_ref(), cluster, count, &self.default_image).await
    }
}
