//! # Block Storage with Archiving
//!
//! Per-channel block store: blocks are appended to size-bounded block files,
//! located through a persistent index, and the oldest sealed files are
//! offloaded to a shared block archive repository. Reads of archived blocks
//! download the file into a local cache on demand.
//!
//! ## File Lifecycle
//!
//! ```text
//! active ──seal──→ sealed (local) ──upload──→ archived ──fetch──→ archived + cached
//!                                               │                        │
//!                                               └────────evict───────────┘
//! ```
//!
//! ## Roles
//!
//! | Role | Archive controller | Fetch on miss |
//! |------|--------------------|---------------|
//! | `Standalone` | no | no |
//! | `Archiver` | yes | yes |
//! | `Client` | no | yes |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Block file format, index, config, errors
//! - `ports/` - Port traits (inbound API, outbound SPI)
//! - `adapters/` - Key-value backends, archive transports, directory lock
//! - `service/` - `BlockStore` application service
//! - `fetch/` - Single-flight fetch coordinator and cache
//! - `archiver/` - Archive controller
//! - `verifier/` - Chain verifier
//!
//! ## Usage
//!
//! ```ignore
//! use block_storage::{BlockStore, BlockStoreApi, StoreConfig};
//!
//! let store = BlockStore::open_default("mychannel", StoreConfig::from_env()?)?;
//! store.add_block(&block)?;
//! let block = store.retrieve_block_by_number(0).await?;
//! ```

pub mod adapters;
pub mod archiver;
pub mod domain;
pub mod fetch;
pub mod ports;
pub mod service;
pub mod verifier;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export key types for convenience
pub use archiver::{ArchiveController, ArchivedFile, SweepReport};
pub use domain::config::{ConfigError, StoreConfig, TransferPolicy};
pub use domain::errors::{ArchiveClientError, ChainBreakKind, KVStoreError, StorageError};
pub use domain::metrics::{ArchiveMetrics, MetricsSnapshot};
pub use domain::value_objects::{
    BlockchainInfo, FileEntry, FileId, FileState, FileStatus, StoreEvent, StoreRole,
};
pub use fetch::{CachedFile, FetchCoordinator};
pub use ports::inbound::BlockStoreApi;
pub use ports::outbound::{ArchiveClient, BatchOperation, KeyValueStore};
pub use service::{BlockIterator, BlockStore, BlockStoreDependencies};
pub use verifier::{ChainVerifier, SignaturePolicy, VerificationFailure, VerificationReport};
