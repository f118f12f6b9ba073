//! # Cluster State Cache
//!
//! Last declaration observed per cluster identity. Presence of an entry is
//! only used to tell a first reconciliation apart from later ones; desired
//! state is always read from the event being processed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::crds::NatsStreamingCluster;

type Entries = HashMap<String, Arc<NatsStreamingCluster>>;

/// Shared handle to the observation cache. Clones share the same entries.
#[derive(Clone, Default)]
pub struct ClusterCache {
    entries: Arc<Mutex<Entries>>,
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // Entries are plain values, a panicking writer cannot leave them torn.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains_key(identity)
    }

    /// Record `cluster` as the latest declaration for its identity.
    pub fn observe(&self, cluster: Arc<NatsStreamingCluster>) -> Option<Arc<NatsStreamingCluster>> {
        let identity = cluster.identity();
        self.lock().insert(identity, cluster)
    }

    pub fn forget(&self, identity: &str) -> Option<Arc<NatsStreamingCluster>> {
        self.lock().remove(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for ClusterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCache")
            .field("clusters", &self.len())
            .finish()
    }
}
