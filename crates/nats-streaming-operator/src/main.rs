//! NATS Streaming Operator main entry point

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nats_streaming_operator::cli::Cli;
use nats_streaming_operator::{ControllerError, OperatorManager};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides --debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let manager = OperatorManager::new(cli.into_config())
        .await
        .context("failed to set up operator")?;

    match manager.run().await {
        Ok(()) => Ok(()),
        Err(ControllerError::Interrupted) => {
            info!("Exiting...");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
