use crate::domain::errors::KVStoreError;
use crate::ports::outbound::{BatchOperation, KeyValueStore, ScanResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::memory::InMemoryKVStore;

const LOG_FILE: &str = "index.log";

fn io_err(e: impl std::fmt::Display) -> KVStoreError {
    KVStoreError::IOError {
        message: e.to_string(),
    }
}

/// File-backed key-value store for nodes built without RocksDB.
///
/// Every atomic batch is one log record `len:u32 LE | crc32:u32 LE | bincode
/// batch`, fsynced before the write returns. On open the log is replayed up
/// to the first torn or mismatching record, then compacted into a single
/// snapshot record.
///
/// `open_read_only` replays without compacting and rejects every write.
pub struct FileBackedKVStore {
    data: InMemoryKVStore,
    /// `None` when opened read-only.
    log: Option<File>,
    path: PathBuf,
}

impl FileBackedKVStore {
    /// Open (or create) the store in directory `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, KVStoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let path = dir.join(LOG_FILE);

        let mut data = InMemoryKVStore::new();
        let replayed = Self::replay(&path, &mut data)?;
        if replayed > 0 {
            tracing::info!(
                path = %path.display(),
                records = replayed,
                keys = data.len(),
                "[block-storage] index log replayed"
            );
        }

        Self::compact(&path, &data)?;
        let log = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        Ok(Self {
            data,
            log: Some(log),
            path,
        })
    }

    /// Replay the log in `dir` without touching it. A missing log is empty.
    pub fn open_read_only<P: AsRef<Path>>(dir: P) -> Result<Self, KVStoreError> {
        let path = dir.as_ref().join(LOG_FILE);
        let mut data = InMemoryKVStore::new();
        Self::replay(&path, &mut data)?;
        Ok(Self {
            data,
            log: None,
            path,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.log.is_none()
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(path: &Path, data: &mut InMemoryKVStore) -> Result<usize, KVStoreError> {
        let mut bytes = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut bytes).map_err(io_err)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_err(e)),
        }

        let mut cursor = 0;
        let mut records = 0;
        while cursor + 8 <= bytes.len() {
            let len = u32::from_le_bytes([
                bytes[cursor],
                bytes[cursor + 1],
                bytes[cursor + 2],
                bytes[cursor + 3],
            ]) as usize;
            let crc = u32::from_le_bytes([
                bytes[cursor + 4],
                bytes[cursor + 5],
                bytes[cursor + 6],
                bytes[cursor + 7],
            ]);
            let body_start = cursor + 8;
            if body_start + len > bytes.len() {
                break;
            }
            let body = &bytes[body_start..body_start + len];
            if crc32fast::hash(body) != crc {
                break;
            }
            let ops: Vec<BatchOperation> = match bincode::deserialize(body) {
                Ok(ops) => ops,
                Err(_) => break,
            };
            data.apply(ops);
            records += 1;
            cursor = body_start + len;
        }

        if cursor < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                discarded = bytes.len() - cursor,
                "[block-storage] discarding torn index log tail"
            );
        }
        Ok(records)
    }

    fn encode_record(ops: &[BatchOperation]) -> Result<Vec<u8>, KVStoreError> {
        let body = bincode::serialize(ops).map_err(|e| KVStoreError::CorruptionError {
            message: e.to_string(),
        })?;
        let mut record = Vec::with_capacity(body.len() + 8);
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        record.extend_from_slice(&body);
        Ok(record)
    }

    /// Rewrite the log as one snapshot record via temp file and rename.
    fn compact(path: &Path, data: &InMemoryKVStore) -> Result<(), KVStoreError> {
        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path).map_err(io_err)?;
        if !data.is_empty() {
            file.write_all(&Self::encode_record(&data.snapshot())?)
                .map_err(io_err)?;
        }
        file.sync_all().map_err(io_err)?;
        std::fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }

    fn append(&mut self, ops: &[BatchOperation]) -> Result<(), KVStoreError> {
        let Some(log) = self.log.as_mut() else {
            return Err(KVStoreError::IOError {
                message: format!("{} is open read-only", self.path.display()),
            });
        };
        let record = Self::encode_record(ops)?;
        log.write_all(&record).map_err(io_err)?;
        log.sync_data().map_err(io_err)
    }
}

impl KeyValueStore for FileBackedKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.data.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.atomic_batch_write(vec![BatchOperation::put(key, value)])
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.atomic_batch_write(vec![BatchOperation::delete(key)])
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        // Durable first; memory only reflects what the log holds.
        self.append(&operations)?;
        self.data.apply(operations);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        self.data.exists(key)
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError> {
        self.data.prefix_scan(prefix)
    }

    fn range(&self, start: &[u8], end: &[u8]) -> Result<ScanResult, KVStoreError> {
        self.data.range(start, end)
    }
}
