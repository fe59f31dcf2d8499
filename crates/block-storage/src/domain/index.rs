//! # Block Index
//!
//! Durable map from block number and transaction id to a `FileEntry`, plus
//! per-file status and the store checkpoint, kept in an ordered
//! `KeyValueStore`.
//!
//! Writes are grouped into `IndexBatch`es so that "append block + index +
//! advance checkpoint" lands as one atomic batch. Reads take a shared lock and
//! never wait on each other.

use std::collections::HashSet;

use parking_lot::RwLock;

use super::errors::StorageError;
use super::value_objects::{Checkpoint, FileEntry, FileId, FileStatus, KeyPrefix};
use crate::ports::outbound::{BatchOperation, KeyValueStore};

/// Operations to apply to the index atomically.
#[derive(Debug, Default)]
pub struct IndexBatch {
    ops: Vec<BatchOperation>,
    tx_ids: HashSet<String>,
}

impl IndexBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_block(&mut self, number: u64, entry: FileEntry) {
        self.ops
            .push(BatchOperation::put(KeyPrefix::block_key(number), entry.encode()));
    }

    /// Index `tx_id` unless this batch already did.
    ///
    /// Callers check the committed index first; together that keeps the
    /// first occurrence of a duplicated id.
    pub fn put_tx(&mut self, tx_id: &str, entry: FileEntry) {
        if self.tx_ids.insert(tx_id.to_string()) {
            self.ops
                .push(BatchOperation::put(KeyPrefix::tx_key(tx_id), entry.encode()));
        }
    }

    pub fn set_status(&mut self, file_id: FileId, status: FileStatus) {
        self.ops.push(BatchOperation::put(
            KeyPrefix::file_status_key(file_id),
            vec![status.to_byte()],
        ));
    }

    pub fn set_checkpoint(&mut self, cp: &Checkpoint) -> Result<(), StorageError> {
        self.ops
            .push(BatchOperation::put(KeyPrefix::checkpoint_key(), cp.encode()?));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// The persistent block index.
pub struct BlockIndex {
    store: RwLock<Box<dyn KeyValueStore>>,
}

impl BlockIndex {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// Location of block `number`.
    pub fn locate(&self, number: u64) -> Result<FileEntry, StorageError> {
        match self.store.read().get(&KeyPrefix::block_key(number))? {
            Some(bytes) => FileEntry::decode(&bytes),
            None => Err(StorageError::not_found(format!("block {}", number))),
        }
    }

    /// Location of the block holding `tx_id`.
    pub fn locate_by_tx(&self, tx_id: &str) -> Result<FileEntry, StorageError> {
        match self.store.read().get(&KeyPrefix::tx_key(tx_id))? {
            Some(bytes) => FileEntry::decode(&bytes),
            None => Err(StorageError::not_found(format!("transaction {}", tx_id))),
        }
    }

    pub fn has_tx(&self, tx_id: &str) -> Result<bool, StorageError> {
        Ok(self.store.read().exists(&KeyPrefix::tx_key(tx_id))?)
    }

    /// Recorded status of `file_id`; `None` for the active file.
    pub fn file_status(&self, file_id: FileId) -> Result<Option<FileStatus>, StorageError> {
        self.store
            .read()
            .get(&KeyPrefix::file_status_key(file_id))?
            .map(|bytes| FileStatus::from_byte(&bytes))
            .transpose()
    }

    /// Every recorded file status, ascending by file id.
    pub fn file_statuses(&self) -> Result<Vec<(FileId, FileStatus)>, StorageError> {
        let pairs = self
            .store
            .read()
            .prefix_scan(KeyPrefix::FileStatus.as_bytes())?;
        pairs
            .into_iter()
            .map(|(key, value)| {
                let file_id = KeyPrefix::file_id_from_status_key(&key)
                    .ok_or_else(|| StorageError::corruption("malformed file status key"))?;
                Ok((file_id, FileStatus::from_byte(&value)?))
            })
            .collect()
    }

    /// Files marked sealed (still local), ascending.
    pub fn sealed_files(&self) -> Result<Vec<FileId>, StorageError> {
        Ok(self
            .file_statuses()?
            .into_iter()
            .filter(|(_, status)| *status == FileStatus::Sealed)
            .map(|(id, _)| id)
            .collect())
    }

    /// Transition `file_id` from sealed to archived. Idempotent.
    pub fn mark_archived(&self, file_id: FileId) -> Result<(), StorageError> {
        let mut store = self.store.write();
        let key = KeyPrefix::file_status_key(file_id);
        match store.get(&key)? {
            Some(bytes) => match FileStatus::from_byte(&bytes)? {
                FileStatus::Archived => Ok(()),
                FileStatus::Sealed => {
                    store.atomic_batch_write(vec![BatchOperation::put(
                        key,
                        vec![FileStatus::Archived.to_byte()],
                    )])?;
                    Ok(())
                }
            },
            None => Err(StorageError::not_found(format!(
                "sealed file {}",
                file_id
            ))),
        }
    }

    /// Stored checkpoint, or the empty-chain checkpoint.
    pub fn checkpoint(&self) -> Result<Checkpoint, StorageError> {
        match self.store.read().get(&KeyPrefix::checkpoint_key())? {
            Some(bytes) => Checkpoint::decode(&bytes),
            None => Ok(Checkpoint::default()),
        }
    }

    pub fn save_checkpoint(&self, cp: &Checkpoint) -> Result<(), StorageError> {
        let mut batch = IndexBatch::new();
        batch.set_checkpoint(cp)?;
        self.commit(batch)
    }

    /// Block entries with `lo <= number < hi`, ascending.
    pub fn range(&self, lo: u64, hi: u64) -> Result<Vec<(u64, FileEntry)>, StorageError> {
        if lo >= hi {
            return Ok(Vec::new());
        }
        let pairs = self
            .store
            .read()
            .range(&KeyPrefix::block_key(lo), &KeyPrefix::block_key(hi))?;
        pairs
            .into_iter()
            .map(|(key, value)| {
                let number = KeyPrefix::number_from_block_key(&key)
                    .ok_or_else(|| StorageError::corruption("malformed block key"))?;
                Ok((number, FileEntry::decode(&value)?))
            })
            .collect()
    }

    /// Apply `batch` atomically.
    pub fn commit(&self, batch: IndexBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.write().atomic_batch_write(batch.ops)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::InMemoryKVStore;

    fn index() -> BlockIndex {
        BlockIndex::new(Box::new(InMemoryKVStore::new()))
    }

    fn entry(file_id: FileId, offset: u64) -> FileEntry {
        FileEntry {
            file_id,
            offset,
            length: 10,
        }
    }

    #[test]
    fn test_locate_after_commit() {
        let index = index();
        let mut batch = IndexBatch::new();
        batch.put_block(0, entry(0, 0));
        batch.put_tx("tx-a", entry(0, 0));
        index.commit(batch).unwrap();

        assert_eq!(index.locate(0).unwrap(), entry(0, 0));
        assert_eq!(index.locate_by_tx("tx-a").unwrap(), entry(0, 0));
        assert!(matches!(index.locate(1), Err(StorageError::NotFound { .. })));
        assert!(matches!(
            index.locate_by_tx("tx-b"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_tx_in_batch_keeps_first() {
        let index = index();
        let mut batch = IndexBatch::new();
        batch.put_tx("dup", entry(0, 0));
        batch.put_tx("dup", entry(0, 11));
        index.commit(batch).unwrap();

        assert_eq!(index.locate_by_tx("dup").unwrap().offset, 0);
    }

    #[test]
    fn test_mark_archived_is_idempotent() {
        let index = index();
        let mut batch = IndexBatch::new();
        batch.set_status(0, FileStatus::Sealed);
        batch.set_status(1, FileStatus::Sealed);
        index.commit(batch).unwrap();

        index.mark_archived(0).unwrap();
        index.mark_archived(0).unwrap();

        assert_eq!(index.file_status(0).unwrap(), Some(FileStatus::Archived));
        assert_eq!(index.sealed_files().unwrap(), vec![1]);
        assert_eq!(index.file_status(2).unwrap(), None);
    }

    #[test]
    fn test_mark_archived_unknown_file() {
        let index = index();
        assert!(matches!(
            index.mark_archived(5),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_range_is_ordered_and_half_open() {
        let index = index();
        let mut batch = IndexBatch::new();
        for n in [300u64, 2, 1, 256, 0] {
            batch.put_block(n, entry(0, n));
        }
        index.commit(batch).unwrap();

        let numbers: Vec<u64> = index
            .range(1, 300)
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(numbers, vec![1, 2, 256]);
        assert!(index.range(5, 5).unwrap().is_empty());
    }

    #[test]
    fn test_checkpoint_defaults_to_empty_chain() {
        let index = index();
        assert_eq!(index.checkpoint().unwrap(), Checkpoint::default());

        let cp = Checkpoint {
            active_file_id: 2,
            active_file_size: 99,
            last_block_number: Some(12),
            last_block_hash: [1; 32],
            previous_block_hash: [2; 32],
        };
        index.save_checkpoint(&cp).unwrap();
        assert_eq!(index.checkpoint().unwrap(), cp);
    }
}
