//! # Adapters Module
//!
//! Contains adapter implementations for the block store's driven ports.
//!
//! ## Modules
//!
//! - `storage`: `KeyValueStore` backends for the block index
//! - `archive`: `ArchiveClient` transports
//! - `lock`: Channel directory process locking (singleton guard)

pub mod archive;
#[cfg(feature = "locking")]
pub mod lock;
pub mod storage;

pub use archive::{FsArchiveClient, InMemoryArchiveClient};
#[cfg(feature = "locking")]
pub use lock::{DatabaseLock, LockError};
pub use storage::{FileBackedKVStore, InMemoryKVStore};
