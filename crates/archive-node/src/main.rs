//! # Archive Node
//!
//! Entry point of a ledger archive peer.
//!
//! ```text
//! LEDGER_CHANNELS=ch1,ch2 LEDGER_ARCHIVER_ENABLED=true archive-node
//! ```
//!
//! See `archive_node::NodeConfig` for the environment it reads.

use anyhow::{Context, Result};
use archive_node::{NodeConfig, NodeRuntime};
use ledger_telemetry::init_telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("Invalid node configuration")?;
    init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  {} starting", config.telemetry.service_name);
    info!("===========================================");
    info!("Root Dir: {:?}", config.store.root_dir);
    info!("Channels: {}", config.channels.join(","));
    info!("Index Backend: {:?}", config.index_backend);

    let runtime = NodeRuntime::open(config).context("Failed to open block stores")?;
    runtime.start();

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await;
    Ok(())
}
