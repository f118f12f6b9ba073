//! # Controller
//!
//! Turns the NatsStreamingCluster watch into add/update/delete notifications
//! and feeds them to the reconciler one at a time.

use std::collections::{BTreeMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::runtime::watcher;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::crds::NatsStreamingCluster;
use crate::reconciler::Reconciler;
use crate::shutdown::{Shutdown, ShutdownCause};
use crate::DEFAULT_RESYNC_INTERVAL;

/// Notification about one cluster declaration.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Added(Arc<NatsStreamingCluster>),
    Updated {
        old: Arc<NatsStreamingCluster>,
        new: Arc<NatsStreamingCluster>,
    },
    Deleted(Arc<NatsStreamingCluster>),
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("operator interrupted")]
    Interrupted,

    #[error("cluster watch ended unexpectedly")]
    WatchClosed,
}

/// Last known version of every watched cluster, used to tell adds from
/// updates and to replay clusters on resync.
#[derive(Debug, Default)]
pub struct Informer {
    known: BTreeMap<String, Arc<NatsStreamingCluster>>,
}

impl Informer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Translate one watch event into notifications.
    pub fn observe(&mut self, event: watcher::Event<NatsStreamingCluster>) -> Vec<ClusterEvent> {
        match event {
            watcher::Event::Applied(cluster) => vec![self.apply(cluster)],
            watcher::Event::Deleted(cluster) => {
                self.known.remove(&cluster.identity());
                vec![ClusterEvent::Deleted(Arc::new(cluster))]
            }
            watcher::Event::Restarted(clusters) => {
                let mut listed = HashSet::with_capacity(clusters.len());
                let mut events = Vec::with_capacity(clusters.len());
                for cluster in clusters {
                    listed.insert(cluster.identity());
                    events.push(self.apply(cluster));
                }

                // Objects deleted while the watch was down.
                let vanished: Vec<String> = self
                    .known
                    .keys()
                    .filter(|identity| !listed.contains(*identity))
                    .cloned()
                    .collect();
                for identity in vanished {
                    if let Some(cluster) = self.known.remove(&identity) {
                        events.push(ClusterEvent::Deleted(cluster));
                    }
                }

                events
            }
        }
    }

    /// Redeliver every known cluster as an update to itself.
    pub fn resync(&self) -> Vec<ClusterEvent> {
        self.known
            .values()
            .map(|cluster| ClusterEvent::Updated {
                old: Arc::clone(cluster),
                new: Arc::clone(cluster),
            })
            .collect()
    }

    fn apply(&mut self, cluster: NatsStreamingCluster) -> ClusterEvent {
        let new = Arc::new(cluster);
        match self.known.insert(new.identity(), Arc::clone(&new)) {
            Some(old) => ClusterEvent::Updated { old, new },
            None => ClusterEvent::Added(new),
        }
    }
}

/// Controller for NatsStreamingCluster resources
pub struct Controller {
    reconciler: Arc<Reconciler>,
    resync_interval: Duration,
}

impl Controller {
    /// A zero `resync_interval` falls back to [`DEFAULT_RESYNC_INTERVAL`].
    pub fn new(reconciler: Arc<Reconciler>, resync_interval: Duration) -> Self {
        let resync_interval = if resync_interval.is_zero() {
            warn!("Resync interval must be positive, using {DEFAULT_RESYNC_INTERVAL:?}");
            DEFAULT_RESYNC_INTERVAL
        } else {
            resync_interval
        };

        Self {
            reconciler,
            resync_interval,
        }
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    /// Process `watch` until `shutdown` fires.
    ///
    /// A graceful shutdown lets the pass in flight complete and returns
    /// `Ok(())`; an immediate one abandons it and returns
    /// [`ControllerError::Interrupted`].
    pub async fn run<S>(&self, watch: S, shutdown: &Shutdown) -> Result<(), ControllerError>
    where
        S: Stream<Item = Result<watcher::Event<NatsStreamingCluster>, watcher::Error>>,
    {
        let mut watch = pin!(watch);
        let mut informer = Informer::new();
        let mut resync = interval_at(Instant::now() + self.resync_interval, self.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting NATS Streaming controller");

        loop {
            let events = tokio::select! {
                biased;

                cause = shutdown.cancelled() => return stopped(cause),
                _ = resync.tick() => informer.resync(),
                item = watch.next() => match item {
                    Some(Ok(event)) => informer.observe(event),
                    Some(Err(err)) => {
                        warn!("Cluster watch failed: {err}");
                        continue;
                    }
                    None => return Err(ControllerError::WatchClosed),
                },
            };

            for event in events {
                if let Some(ShutdownCause::Graceful) = shutdown.cause() {
                    return stopped(ShutdownCause::Graceful);
                }

                tokio::select! {
                    biased;

                    () = shutdown.interrupted() => return Err(ControllerError::Interrupted),
                    result = self.reconciler.handle(event) => {
                        if let Err(err) = result {
                            error!("Reconciliation failed: {err}");
                        }
                    }
                }
            }
        }
    }
}

fn stopped(cause: ShutdownCause) -> Result<(), ControllerError> {
    match cause {
        ShutdownCause::Graceful => {
            info!("Bye");
            Ok(())
        }
        ShutdownCause::Immediate => Err(ControllerError::Interrupted),
    }
}
