//! # Outbound Ports (Driven Ports)
//!
//! Dependencies required by the block store.
//!
//! - `KeyValueStore`: ordered embedded store behind the block index
//! - `ArchiveClient`: transport to the block archive repository

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shared_types::Hash;

use crate::domain::errors::{ArchiveClientError, KVStoreError};
use crate::domain::value_objects::FileId;

/// Key-value pairs returned by scans.
pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

/// Abstract interface for key-value database operations.
///
/// Production: `RocksDbStore` (archive-node/adapters/storage/rocksdb_adapter.rs)
/// or `FileBackedKVStore`.
/// Testing: `InMemoryKVStore`.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Execute an atomic, durable batch write.
    ///
    /// Either ALL operations in the batch are applied, or NONE are.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError>;

    /// Pairs with `start <= key < end`, in key order.
    fn range(&self, start: &[u8], end: &[u8]) -> Result<ScanResult, KVStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Transport to and from the block archive repository.
///
/// Production: `FsArchiveClient` (network filesystem mount).
/// Testing: `InMemoryArchiveClient`.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Store the file at `local_path` as `file_id`.
    ///
    /// Idempotent: uploading a file the archive already holds with the same
    /// content is a no-op. A differing copy is replaced.
    async fn upload(&self, file_id: FileId, local_path: &Path) -> Result<(), ArchiveClientError>;

    /// Materialize `file_id` at `dest_path`.
    ///
    /// Atomic (a temp file unique to the attempt, then rename). Fails with `NotPresent` if the
    /// archive has no such file.
    async fn download(&self, file_id: FileId, dest_path: &Path) -> Result<(), ArchiveClientError>;

    /// Whether the archive holds `file_id`.
    async fn exists(&self, file_id: FileId) -> Result<bool, ArchiveClientError>;

    /// SHA-256 of the archived copy of `file_id`, `NotPresent` if absent.
    async fn digest(&self, file_id: FileId) -> Result<Hash, ArchiveClientError>;

    /// Label of the repository for logs.
    fn describe(&self) -> String;
}
