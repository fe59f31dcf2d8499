//! # Archive Node Library
//!
//! Runtime of a ledger archive peer. The main entry point is the `main.rs`
//! binary; the library exposes the runtime for testing.
//!
//! ## Startup
//!
//! 1. Read `NodeConfig` from the environment
//! 2. Initialize telemetry
//! 3. Open one `BlockStore` per channel and log its archive role
//! 4. Spawn an `ArchiveController` per store on archiver nodes
//! 5. Spawn the metrics reporter
//!
//! Shutdown cancels every task through one `CancellationToken` and waits
//! for them to finish.

pub mod adapters;
pub mod container;
pub mod runtime;

pub use container::config::{IndexBackend, NodeConfig, NodeConfigError};
pub use container::StoreContainer;
pub use runtime::{report_metrics, store_sample, NodeRuntime};
