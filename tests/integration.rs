// Integration tests for the NATS Streaming operator
// These drive the reconciler and controller end to end against the in-memory pod backend

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::CustomResourceExt;
use tokio::sync::Notify;

use nats_streaming_operator::testing::{cluster, cluster_with_config, command, MemoryBackend};
use nats_streaming_operator::{
    BackendError, ClusterEvent, Controller, ControllerError, NatsStreamingCluster, Outcome,
    PodBackend, Reconciler, ServerConfig, Shutdown, ShutdownCause, StoreKind,
};

const IMAGE: &str = "nats-streaming:0.10.2";

fn reconciler(backend: &MemoryBackend) -> Reconciler {
    Reconciler::new(Arc::new(backend.clone()), IMAGE)
}

async fn pass(reconciler: &Reconciler, cluster: &NatsStreamingCluster) -> Outcome {
    reconciler
        .handle(ClusterEvent::Updated {
            old: Arc::new(cluster.clone()),
            new: Arc::new(cluster.clone()),
        })
        .await
        .unwrap()
}

fn bootstrap_pods(backend: &MemoryBackend) -> Vec<String> {
    backend
        .pod_names("default")
        .into_iter()
        .filter(|name| {
            let pod = backend.pod("default", name).unwrap();
            command(&pod).iter().any(|arg| arg == "-cluster_bootstrap")
        })
        .collect()
}

#[test]
fn test_crd_manifest_renders() {
    let manifest = serde_yaml::to_string(&NatsStreamingCluster::crd()).unwrap();
    assert!(manifest.contains("name: natsstreamingclusters.streaming.nats.io"));
    assert!(manifest.contains("kind: NatsStreamingCluster"));
    assert!(manifest.contains("natsSvc"));
}

#[tokio::test]
async fn test_file_clusters_converge_in_three_passes() {
    for size in [1, 3, 5] {
        let backend = MemoryBackend::new();
        let reconciler = reconciler(&backend);
        let s = cluster("s", size, StoreKind::File);

        let first = reconciler.handle(ClusterEvent::Added(Arc::new(s.clone()))).await.unwrap();
        assert_eq!(first, Outcome::Bootstrapped("s-1".to_string()));

        let second = pass(&reconciler, &s).await;
        if size == 1 {
            assert_eq!(second, Outcome::Converged);
        } else {
            let expected: Vec<String> = (2..=size).rev().map(|i| format!("s-{i}")).collect();
            assert_eq!(second, Outcome::ScaledUp(expected));
        }

        assert_eq!(pass(&reconciler, &s).await, Outcome::Converged);
        assert_eq!(backend.pod_names("default").len(), size as usize);
    }
}

#[tokio::test]
async fn test_only_first_node_bootstraps() {
    let backend = MemoryBackend::new();
    let reconciler = reconciler(&backend);
    let s = cluster("s", 5, StoreKind::File);

    reconciler.handle(ClusterEvent::Added(Arc::new(s.clone()))).await.unwrap();
    pass(&reconciler, &s).await;

    assert_eq!(bootstrap_pods(&backend), vec!["s-1".to_string()]);
}

#[tokio::test]
async fn test_single_node_never_bootstraps() {
    let backend = MemoryBackend::new();
    let reconciler = reconciler(&backend);
    let s = cluster("s", 1, StoreKind::File);

    reconciler.handle(ClusterEvent::Added(Arc::new(s))).await.unwrap();

    assert!(bootstrap_pods(&backend).is_empty());
    assert_eq!(backend.pod_names("default"), vec!["s-1".to_string()]);
}

#[tokio::test]
async fn test_sql_cluster_is_clamped_to_one_pod() {
    let backend = MemoryBackend::new();
    let reconciler = reconciler(&backend);
    let s = cluster("s", 4, StoreKind::Sql);

    let outcome = reconciler.handle(ClusterEvent::Added(Arc::new(s.clone()))).await.unwrap();
    assert_eq!(outcome, Outcome::ScaledUp(vec!["s-1".to_string()]));
    assert_eq!(pass(&reconciler, &s).await, Outcome::Converged);
    assert_eq!(backend.pod_names("default"), vec!["s-1".to_string()]);
}

#[tokio::test]
async fn test_sql_and_memory_pods_carry_no_clustering_flags() {
    for store in [StoreKind::Sql, StoreKind::Memory] {
        let backend = MemoryBackend::new();
        let reconciler = reconciler(&backend);
        let s = cluster("s", 3, store);

        reconciler.handle(ClusterEvent::Added(Arc::new(s.clone()))).await.unwrap();
        pass(&reconciler, &s).await;

        for name in backend.pod_names("default") {
            let args = command(&backend.pod("default", &name).unwrap());
            assert!(!args.iter().any(|arg| arg == "-clustered"), "{store:?} {name}: {args:?}");
            assert!(!args.iter().any(|arg| arg == "-cluster_bootstrap"), "{store:?} {name}: {args:?}");
        }
    }
}

#[tokio::test]
async fn test_fault_tolerant_pods_share_one_store() {
    let backend = MemoryBackend::new();
    let reconciler = reconciler(&backend);
    let config = ServerConfig {
        store_dir: Some("/pv/stan".to_string()),
        ft_group: Some("stan".to_string()),
        ..Default::default()
    };
    let s = cluster_with_config("s", 3, StoreKind::File, Some(config));

    let outcome = reconciler.handle(ClusterEvent::Added(Arc::new(s))).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::ScaledUp(vec!["s-3".to_string(), "s-2".to_string(), "s-1".to_string()])
    );

    for name in backend.pod_names("default") {
        let args = command(&backend.pod("default", &name).unwrap()).join(" ");
        assert!(args.contains("-dir /pv/stan/s-1 --ft_group=stan"), "{name}: {args}");
        assert!(!args.contains("-clustered"), "{name}: {args}");
    }
}

#[tokio::test]
async fn test_scale_down_keeps_first_pod() {
    let backend = MemoryBackend::new();
    let reconciler = reconciler(&backend);
    let mut s = cluster("s", 5, StoreKind::File);

    reconciler.handle(ClusterEvent::Added(Arc::new(s.clone()))).await.unwrap();
    pass(&reconciler, &s).await;

    s.spec.size = 1;
    assert_eq!(pass(&reconciler, &s).await, Outcome::ScaledDown(4));
    assert_eq!(backend.pod_names("default"), vec!["s-1".to_string()]);
    assert_eq!(pass(&reconciler, &s).await, Outcome::Converged);
}

#[tokio::test]
async fn test_redelivered_notifications_are_idempotent() {
    let backend = MemoryBackend::new();
    let reconciler = reconciler(&backend);
    let s = Arc::new(cluster("s", 3, StoreKind::File));

    for _ in 0..4 {
        reconciler.handle(ClusterEvent::Added(Arc::clone(&s))).await.unwrap();
    }

    assert_eq!(
        backend.pod_names("default"),
        vec!["s-1".to_string(), "s-2".to_string(), "s-3".to_string()]
    );
    assert_eq!(backend.created().len(), 3);
    assert_eq!(bootstrap_pods(&backend), vec!["s-1".to_string()]);
}

#[tokio::test]
async fn test_bootstrap_then_followers_then_steady() {
    let backend = MemoryBackend::new();
    let reconciler = reconciler(&backend);
    let s = cluster("stan", 3, StoreKind::File);

    reconciler.handle(ClusterEvent::Added(Arc::new(s.clone()))).await.unwrap();
    assert_eq!(backend.created(), vec!["stan-1".to_string()]);
    let first = command(&backend.pod("default", "stan-1").unwrap());
    assert_eq!(first.last().map(String::as_str), Some("-cluster_bootstrap"));

    pass(&reconciler, &s).await;
    assert_eq!(
        backend.created(),
        vec!["stan-1".to_string(), "stan-3".to_string(), "stan-2".to_string()]
    );
    for name in ["stan-2", "stan-3"] {
        let args = command(&backend.pod("default", name).unwrap());
        assert!(args.contains(&format!("--cluster_node_id=\"{name}\"")), "{args:?}");
        assert!(!args.iter().any(|arg| arg == "-cluster_bootstrap"), "{args:?}");
    }

    pass(&reconciler, &s).await;
    assert_eq!(backend.created().len(), 3);
    assert!(backend.deleted().is_empty());
}

/// Backend whose creates block until released.
struct GatedBackend {
    inner: MemoryBackend,
    entered: Notify,
    release: Notify,
}

impl GatedBackend {
    fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl PodBackend for GatedBackend {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, BackendError> {
        self.inner.list_pods(namespace, selector).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, BackendError> {
        self.inner.get_pod(namespace, name).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), BackendError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.create_pod(namespace, pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        self.inner.delete_pod(namespace, name).await
    }
}

type WatchItem = Result<watcher::Event<NatsStreamingCluster>, watcher::Error>;

fn spawn_controller(
    backend: Arc<GatedBackend>,
    shutdown: &Shutdown,
) -> tokio::task::JoinHandle<Result<(), ControllerError>> {
    let events: Vec<WatchItem> = vec![
        Ok(watcher::Event::Applied(cluster("a", 1, StoreKind::File))),
        Ok(watcher::Event::Applied(cluster("b", 1, StoreKind::File))),
    ];
    // Keep the watch open once the events are delivered.
    let watch = futures::stream::iter(events).chain(futures::stream::pending());

    let reconciler = Arc::new(Reconciler::new(backend, IMAGE));
    let controller = Controller::new(reconciler, Duration::from_secs(3600));
    let shutdown = shutdown.clone();
    tokio::spawn(async move { controller.run(watch, &shutdown).await })
}

#[tokio::test]
async fn test_graceful_shutdown_drains_pass_in_flight() {
    let memory = MemoryBackend::new();
    let backend = Arc::new(GatedBackend::new(memory.clone()));
    let shutdown = Shutdown::new();
    let task = spawn_controller(Arc::clone(&backend), &shutdown);

    backend.entered.notified().await;
    shutdown.trigger(ShutdownCause::Graceful);
    backend.release.notify_one();

    let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(memory.created(), vec!["a-1".to_string()]);
}

#[tokio::test]
async fn test_immediate_shutdown_abandons_pass_in_flight() {
    let memory = MemoryBackend::new();
    let backend = Arc::new(GatedBackend::new(memory.clone()));
    let shutdown = Shutdown::new();
    let task = spawn_controller(Arc::clone(&backend), &shutdown);

    backend.entered.notified().await;
    shutdown.trigger(ShutdownCause::Immediate);

    let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ControllerError::Interrupted)));
    assert!(memory.created().is_empty());
}
