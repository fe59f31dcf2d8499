//! # Value Objects
//!
//! Index records, file identities and the small enums shared across the store.
//!
//! ## Index Layout
//!
//! | Prefix | Key | Value |
//! |--------|-----|-------|
//! | `bn` | block number (u64 BE) | `FileEntry` |
//! | `tx` | transaction id (UTF-8) | `FileEntry` |
//! | `fs` | file id (u32 BE) | `FileStatus` (1 byte) |
//! | `cp` | - | `Checkpoint` (bincode) |
//!
//! Big-endian numbers keep the ordered key-value store sorted by number.

use serde::{Deserialize, Serialize};
use shared_types::{Hash, ZERO_HASH};
use unsigned_varint::{decode, encode};

use super::errors::StorageError;

/// Sequence id of a block file.
pub type FileId = u32;

const BLOCK_FILE_PREFIX: &str = "blockfile_";

/// Canonical file name for `file_id`: `blockfile_000042`.
pub fn block_file_name(file_id: FileId) -> String {
    format!("{}{:06}", BLOCK_FILE_PREFIX, file_id)
}

/// Parse a canonical block file name back into its id.
pub fn parse_block_file_name(name: &str) -> Option<FileId> {
    let digits = name.strip_prefix(BLOCK_FILE_PREFIX)?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Location of one block inside a block file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    pub file_id: FileId,
    /// Offset of the record (length prefix included).
    pub offset: u64,
    /// Length of the block bytes (length prefix excluded).
    pub length: u64,
}

impl FileEntry {
    /// Varint-encode `(file_id, offset, length)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(encode::u32(self.file_id, &mut encode::u32_buffer()));
        out.extend_from_slice(encode::u64(self.offset, &mut encode::u64_buffer()));
        out.extend_from_slice(encode::u64(self.length, &mut encode::u64_buffer()));
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let bad = |e: decode::Error| StorageError::corruption(format!("bad file entry: {}", e));
        let (file_id, rest) = decode::u32(bytes).map_err(bad)?;
        let (offset, rest) = decode::u64(rest).map_err(bad)?;
        let (length, rest) = decode::u64(rest).map_err(bad)?;
        if !rest.is_empty() {
            return Err(StorageError::corruption("trailing bytes in file entry"));
        }
        Ok(Self {
            file_id,
            offset,
            length,
        })
    }
}

/// Recorded status of a non-active file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Sealed,
    Archived,
}

impl FileStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            FileStatus::Sealed => 1,
            FileStatus::Archived => 2,
        }
    }

    pub fn from_byte(bytes: &[u8]) -> Result<Self, StorageError> {
        match bytes {
            [1] => Ok(FileStatus::Sealed),
            [2] => Ok(FileStatus::Archived),
            other => Err(StorageError::corruption(format!(
                "unknown file status {:?}",
                other
            ))),
        }
    }
}

/// Observable state of a block file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    /// The file being appended to.
    Active,
    /// Sealed, canonical copy on local disk.
    SealedLocal,
    /// Only in the remote archive.
    ArchivedOnly,
    /// In the remote archive with a copy in the fetch cache.
    ArchivedCached,
}

/// Durable write position of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Id of the active file (the next unsealed id).
    pub active_file_id: FileId,
    /// Bytes of the active file covered by the index.
    pub active_file_size: u64,
    /// Last committed block, `None` for an empty chain.
    pub last_block_number: Option<u64>,
    /// Header hash of the last committed block.
    pub last_block_hash: Hash,
    /// Header hash of the block before it.
    pub previous_block_hash: Hash,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            active_file_id: 0,
            active_file_size: 0,
            last_block_number: None,
            last_block_hash: ZERO_HASH,
            previous_block_hash: ZERO_HASH,
        }
    }
}

impl Checkpoint {
    /// Number of committed blocks.
    pub fn height(&self) -> u64 {
        self.last_block_number.map_or(0, |n| n + 1)
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(self).map_err(|e| StorageError::corruption(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        bincode::deserialize(bytes)
            .map_err(|e| StorageError::corruption(format!("bad checkpoint: {}", e)))
    }
}

/// Key prefixes for the index store.
#[derive(Debug, Clone, Copy)]
pub enum KeyPrefix {
    /// `bn{number}` -> FileEntry
    BlockNumber,
    /// `tx{tx_id}` -> FileEntry
    Transaction,
    /// `fs{file_id}` -> FileStatus
    FileStatus,
    /// `cp` -> Checkpoint
    Checkpoint,
}

impl KeyPrefix {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            KeyPrefix::BlockNumber => b"bn",
            KeyPrefix::Transaction => b"tx",
            KeyPrefix::FileStatus => b"fs",
            KeyPrefix::Checkpoint => b"cp",
        }
    }

    pub fn block_key(number: u64) -> Vec<u8> {
        let mut key = KeyPrefix::BlockNumber.as_bytes().to_vec();
        key.extend_from_slice(&number.to_be_bytes());
        key
    }

    pub fn tx_key(tx_id: &str) -> Vec<u8> {
        let mut key = KeyPrefix::Transaction.as_bytes().to_vec();
        key.extend_from_slice(tx_id.as_bytes());
        key
    }

    pub fn file_status_key(file_id: FileId) -> Vec<u8> {
        let mut key = KeyPrefix::FileStatus.as_bytes().to_vec();
        key.extend_from_slice(&file_id.to_be_bytes());
        key
    }

    pub fn checkpoint_key() -> Vec<u8> {
        KeyPrefix::Checkpoint.as_bytes().to_vec()
    }

    /// Recover the file id from an `fs` key.
    pub fn file_id_from_status_key(key: &[u8]) -> Option<FileId> {
        let raw = key.strip_prefix(KeyPrefix::FileStatus.as_bytes())?;
        Some(FileId::from_be_bytes(raw.try_into().ok()?))
    }

    /// Recover the block number from a `bn` key.
    pub fn number_from_block_key(key: &[u8]) -> Option<u64> {
        let raw = key.strip_prefix(KeyPrefix::BlockNumber.as_bytes())?;
        Some(u64::from_be_bytes(raw.try_into().ok()?))
    }
}

/// Archiving role of a store, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreRole {
    /// No archive access; archived files are unreadable.
    #[default]
    Standalone,
    /// Runs the archive controller and fetches on miss.
    Archiver,
    /// Fetches archived files on miss, never offloads.
    Client,
}

impl StoreRole {
    pub fn is_archiver(self) -> bool {
        self == StoreRole::Archiver
    }

    /// Whether reads may fall through to the archive.
    pub fn fetches_on_miss(self) -> bool {
        matches!(self, StoreRole::Archiver | StoreRole::Client)
    }
}

/// Summary of the chain held by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockchainInfo {
    pub height: u64,
    pub current_block_hash: Hash,
    pub previous_block_hash: Hash,
}

impl From<&Checkpoint> for BlockchainInfo {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            height: cp.height(),
            current_block_hash: cp.last_block_hash,
            previous_block_hash: cp.previous_block_hash,
        }
    }
}

/// Signals published by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A file was sealed and a new active file created.
    FileSealed(FileId),
}
