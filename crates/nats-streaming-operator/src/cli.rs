//! Command line for the operator binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::Parser;

use crate::pod::DEFAULT_IMAGE;
use crate::OperatorConfig;

/// Kubernetes operator for NATS Streaming clusters
#[derive(Parser, Debug)]
#[command(name = "nats-streaming-operator", version, about, long_about = None)]
pub struct Cli {
    /// Namespace to watch; all namespaces when empty
    #[arg(long, env = "MY_POD_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Path to a kubeconfig file; in-cluster config when unset
    #[arg(long, env = "KUBERNETES_CONFIG_FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "DEBUG", value_parser = FalseyValueParser::new())]
    pub debug: bool,

    /// Server image used when a cluster does not declare one
    #[arg(long, env = "STAN_DEFAULT_IMAGE", default_value = DEFAULT_IMAGE)]
    pub default_image: String,

    /// Seconds between full resyncs of every known cluster
    #[arg(
        long,
        env = "STAN_RESYNC_SECONDS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub resync_seconds: u64,

    /// Do not install SIGINT/SIGTERM handlers
    #[arg(long, env = "STAN_NO_SIGNALS", value_parser = FalseyValueParser::new())]
    pub no_signals: bool,
}

impl Cli {
    /// Log level used when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    pub fn into_config(self) -> OperatorConfig {
        OperatorConfig {
            namespace: self.namespace,
            kubeconfig: self.kubeconfig,
            default_image: self.default_image,
            resync_interval: Duration::from_secs(self.resync_seconds),
            handle_signals: !self.no_signals,
        }
    }
}
