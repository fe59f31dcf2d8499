//! # Ledger Telemetry
//!
//! Logging and metrics for the ledger archive node.
//!
//! ## Components
//!
//! - **Logs**: `tracing` subscriber with an env filter, pretty or JSON output
//! - **Metrics**: Prometheus registry with per-channel archive gauges
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledger_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // Logs and metrics are now being collected
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LEDGER_SERVICE_NAME` | `ledger-archive` | Service name in the startup log |
//! | `LEDGER_LOG_LEVEL` | `RUST_LOG`, then `info` | Log filter |
//! | `LEDGER_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `LEDGER_JSON_LOGS` | `true` in containers | JSON log lines |

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, record_store_sample, register_metrics, StoreSample, BLOCKS_COMMITTED,
    CACHE_EVICTIONS, CACHE_HITS, CHAIN_HEIGHT, DOWNLOADS_STARTED, DOWNLOAD_FAILURES,
    FILES_ARCHIVED, FILES_SEALED, REGISTRY, UPLOAD_FAILURES,
};
pub use tracing_setup::init_tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics, then install the tracing subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_tracing(config)
}
