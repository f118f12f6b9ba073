//! # Kubernetes Operator Manager
//!
//! Owns the client, the controller and the shutdown handle for one
//! operator process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Config};
use tracing::{error, info};

use crate::backend::KubeBackend;
use crate::controller::{Controller, ControllerError};
use crate::crds::NatsStreamingCluster;
use crate::reconciler::Reconciler;
use crate::shutdown::{handle_signals, Shutdown, ShutdownCause};
use crate::OperatorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("failed to load kubeconfig {path}: {source}")]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: KubeconfigError,
    },

    #[error("failed to create Kubernetes client: {0}")]
    Client(#[from] kube::Error),
}

/// Main operator manager
pub struct OperatorManager {
    config: OperatorConfig,
    client: Client,
    controller: Controller,
    shutdown: Shutdown,
}

impl OperatorManager {
    /// Connect to the cluster and set up the controller.
    pub async fn new(config: OperatorConfig) -> Result<Self, ManagerError> {
        let client = connect(config.kubeconfig.as_ref()).await?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: OperatorConfig, client: Client) -> Self {
        let backend = Arc::new(KubeBackend::new(client.clone()));
        let reconciler = Arc::new(Reconciler::new(backend, config.default_image.clone()));
        let controller = Controller::new(reconciler, config.resync_interval);

        Self {
            config,
            client,
            controller,
            shutdown: Shutdown::new(),
        }
    }

    /// Run until shutdown. See [`Controller::run`] for the return value.
    pub async fn run(&self) -> Result<(), ControllerError> {
        info!("Starting NATS Streaming Operator v{}", env!("CARGO_PKG_VERSION"));
        info!("Configuration: {:?}", self.config);

        let signals = self.config.handle_signals.then(|| {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_signals(shutdown).await {
                    error!("Failed to install signal handlers: {err}");
                }
            })
        });

        let api: Api<NatsStreamingCluster> = if self.config.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.config.namespace)
        };
        let watch = watcher(api, watcher::Config::default()).default_backoff();

        info!("Resyncing clusters every {:?}", self.controller.resync_interval());
        let result = self.controller.run(watch, &self.shutdown).await;

        if let Some(handle) = signals {
            handle.abort();
        }
        result
    }

    /// Stop after the reconciliation pass in flight.
    pub fn shutdown(&self) {
        self.shutdown.trigger(ShutdownCause::Graceful);
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }
}

async fn connect(kubeconfig: Option<&PathBuf>) -> Result<Client, ManagerError> {
    let Some(path) = kubeconfig else {
        return Ok(Client::try_default().await?);
    };

    let kubeconfig_error = |source| ManagerError::Kubeconfig {
        path: path.clone(),
        source,
    };
    let kubeconfig = Kubeconfig::read_from(path).map_err(kubeconfig_error)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(kubeconfig_error)?;

    Ok(Client::try_from(config)?)
}

/// Operator builder for fluent configuration
pub struct OperatorBuilder {
    config: OperatorConfig,
}

impl OperatorBuilder {
    pub fn new() -> Self {
        Self {
            config: OperatorConfig::default(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.kubeconfig = Some(path.into());
        self
    }

    pub fn default_image(mut self, image: impl Into<String>) -> Self {
        self.config.default_image = image.into();
        self
    }

    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.config.resync_interval = interval;
        self
    }

    pub fn handle_signals(mut self, enable: bool) -> Self {
        self.config.handle_signals = enable;
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub async fn build(self) -> Result<OperatorManager, ManagerError> {
        OperatorManager::new(self.config).await
    }
}

impl Default for OperatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_builder() {
        let builder = OperatorBuilder::new()
            .namespace("streaming")
            .kubeconfig("/etc/kube/config")
            .default_image("mirror/nats-streaming:0.10.2")
            .resync_interval(Duration::from_secs(5))
            .handle_signals(false);

        let config = builder.config();
        assert_eq!(config.namespace, "streaming");
        assert_eq!(config.kubeconfig, Some(PathBuf::from("/etc/kube/config")));
        assert_eq!(config.default_image, "mirror/nats-streaming:0.10.2");
        assert_eq!(config.resync_interval, Duration::from_secs(5));
        assert!(!config.handle_signals);
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_fails_setup() {
        let result = OperatorBuilder::new()
            .kubeconfig("/nonexistent/kubeconfig")
            .build()
            .await;

        match result {
            Err(ManagerError::Kubeconfig { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/kubeconfig"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("setup should fail without a kubeconfig"),
        }
    }
}
