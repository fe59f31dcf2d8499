//! # Domain Errors
//!
//! Error types for the block file store and the archiving subsystem.
//!
//! ## Design Principles
//!
//! - Structural failures (`ChainBreak`, `Corruption`) are surfaced, never repaired
//! - Transient failures (`IoFailure`, `ArchiveUnavailable`) may be retried by the caller
//! - No panics in domain logic (use Result instead)

use shared_types::{CodecError, Hash};
use thiserror::Error;

use super::value_objects::FileId;

/// Render the first bytes of a hash for error messages.
pub(crate) fn short_hash(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}

/// The way an append or a recovered record broke the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainBreakKind {
    /// Block number is not `last + 1`.
    OutOfOrder { expected: u64, actual: u64 },
    /// Previous hash does not match the last block's header hash.
    HashMismatch { expected: Hash, actual: Hash },
}

impl std::fmt::Display for ChainBreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainBreakKind::OutOfOrder { expected, actual } => {
                write!(f, "expected block number {}, got {}", expected, actual)
            }
            ChainBreakKind::HashMismatch { expected, actual } => write!(
                f,
                "expected previous hash {}, got {}",
                short_hash(expected),
                short_hash(actual)
            ),
        }
    }
}

/// Errors that can occur during store, archive and fetch operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Linkage violation on append.
    #[error("Chain break at block {number}: {kind}")]
    ChainBreak { number: u64, kind: ChainBreakKind },

    /// An on-disk record cannot be decoded or disagrees with the index.
    #[error("Corruption: {message}")]
    Corruption { message: String },

    /// Disk error; the operation may be retried.
    #[error("I/O failure: {message}")]
    IoFailure { message: String },

    /// Upload or download failed after retries, or the store has no archive transport.
    #[error("Archive unavailable for file {file_id}: {message}")]
    ArchiveUnavailable { file_id: FileId, message: String },

    /// Requested block or transaction is not in the index.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// The archive was probed and does not hold the file.
    #[error("File {file_id} not present in archive")]
    NotPresent { file_id: FileId },

    /// The operation observed its cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Key-value backend failure.
    #[error("Index error: {0}")]
    Index(#[from] KVStoreError),

    /// The channel directory is held by another process.
    #[error("Database locked: {message}")]
    DatabaseLocked { message: String },

    /// A write on a store opened for auditing.
    #[error("Store for channel {channel} is open read-only")]
    ReadOnly { channel: String },
}

impl StorageError {
    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        StorageError::Corruption {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        StorageError::NotFound { what: what.into() }
    }

    /// True for failures a caller may retry in place.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::IoFailure { .. } | StorageError::ArchiveUnavailable { .. }
        )
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoFailure {
            message: err.to_string(),
        }
    }
}

impl From<CodecError> for StorageError {
    fn from(err: CodecError) -> Self {
        StorageError::Corruption {
            message: err.to_string(),
        }
    }
}

/// Key-value store errors.
#[derive(Debug, Clone, Error)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError { message: String },
    /// Data corruption in the store.
    #[error("KV store corruption: {message}")]
    CorruptionError { message: String },
}

/// Errors returned by an archive transport.
#[derive(Debug, Clone, Error)]
pub enum ArchiveClientError {
    /// The archive has no such file.
    #[error("file {file_id} not present in archive")]
    NotPresent { file_id: FileId },
    /// Transport or filesystem failure.
    #[error("archive I/O error: {message}")]
    Io { message: String },
    /// An attempt exceeded its deadline.
    #[error("archive transfer timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl From<std::io::Error> for ArchiveClientError {
    fn from(err: std::io::Error) -> Self {
        ArchiveClientError::Io {
            message: err.to_string(),
        }
    }
}

impl ArchiveClientError {
    /// Convert into a store error for `file_id`.
    pub fn into_storage(self, file_id: FileId) -> StorageError {
        match self {
            ArchiveClientError::NotPresent { file_id } => StorageError::NotPresent { file_id },
            other => StorageError::ArchiveUnavailable {
                file_id,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_break_display() {
        let err = StorageError::ChainBreak {
            number: 42,
            kind: ChainBreakKind::HashMismatch {
                expected: [0xAB; 32],
                actual: [0xCD; 32],
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("block 42"));
        assert!(msg.contains("abababab"));
        assert!(msg.contains("cdcdcdcd"));
    }

    #[test]
    fn test_kv_error_conversion() {
        let kv_err = KVStoreError::IOError {
            message: "disk failure".to_string(),
        };
        let storage_err: StorageError = kv_err.into();

        match storage_err {
            StorageError::Index(KVStoreError::IOError { message }) => {
                assert!(message.contains("disk failure"));
            }
            _ => panic!("Expected Index error"),
        }
    }

    #[test]
    fn test_archive_error_mapping() {
        let absent = ArchiveClientError::NotPresent { file_id: 3 }.into_storage(3);
        assert!(matches!(absent, StorageError::NotPresent { file_id: 3 }));

        let timeout = ArchiveClientError::Timeout { secs: 5 }.into_storage(3);
        assert!(matches!(
            timeout,
            StorageError::ArchiveUnavailable { file_id: 3, .. }
        ));
        assert!(timeout.is_transient());
    }
}
