//! # RocksDB Storage Adapter
//!
//! RocksDB implementation of the block index `KeyValueStore` port.
//!
//! ## Features
//!
//! - Atomic batch writes (`WriteBatch`)
//! - Snappy compression
//! - Bloom filters for point lookups of block and tx keys
//! - Synced writes, so a committed batch survives a crash
//!
//! One database per channel, under `<root>/index/<channel>`.

use std::path::PathBuf;

use block_storage::ports::outbound::{BatchOperation, KeyValueStore, ScanResult};
use block_storage::KVStoreError;
use rocksdb::{Direction, IteratorMode, Options, ReadOptions, WriteBatch, WriteOptions, DB};

/// RocksDB configuration for the block index.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 16MB)
    pub write_buffer_size: usize,
    /// fsync each write (default: true)
    pub sync_writes: bool,
}

impl RocksDbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 64 * 1024 * 1024,
            write_buffer_size: 16 * 1024 * 1024,
            sync_writes: true,
        }
    }

    /// Small buffers, no sync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            sync_writes: false,
        }
    }
}

/// RocksDB-backed key-value store implementing the `KeyValueStore` trait.
pub struct RocksDbStore {
    db: DB,
    sync_writes: bool,
}

impl RocksDbStore {
    /// Open or create the database at `config.path`.
    pub fn open(config: RocksDbConfig) -> Result<Self, KVStoreError> {
        std::fs::create_dir_all(&config.path).map_err(|e| KVStoreError::IOError {
            message: format!("Failed to create {}: {}", config.path.display(), e),
        })?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, &config.path).map_err(|e| KVStoreError::IOError {
            message: format!("Failed to open RocksDB: {}", e),
        })?;

        tracing::debug!(path = %config.path.display(), "[block-storage] rocksdb index opened");
        Ok(Self {
            db,
            sync_writes: config.sync_writes,
        })
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        write_opts
    }

    fn collect(
        &self,
        from: &[u8],
        read_opts: ReadOptions,
        keep: impl Fn(&[u8]) -> bool,
    ) -> Result<ScanResult, KVStoreError> {
        let mut results = Vec::new();
        for item in self
            .db
            .iterator_opt(IteratorMode::From(from, Direction::Forward), read_opts)
        {
            let (key, value) = item.map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB scan failed: {}", e),
            })?;
            if !keep(&key[..]) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.db.get(key).map_err(|e| KVStoreError::IOError {
            message: format!("RocksDB get failed: {}", e),
        })
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.db
            .put_opt(key, value, &self.write_options())
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB put failed: {}", e),
            })
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.db
            .delete_opt(key, &self.write_options())
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB delete failed: {}", e),
            })
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        let mut batch = WriteBatch::default();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => batch.put(&key, &value),
                BatchOperation::Delete { key } => batch.delete(&key),
            }
        }

        self.db
            .write_opt(batch, &self.write_options())
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB batch write failed: {}", e),
            })
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        self.db
            .get_pinned(key)
            .map(|v| v.is_some())
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB exists check failed: {}", e),
            })
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError> {
        self.collect(prefix, ReadOptions::default(), |key| key.starts_with(prefix))
    }

    fn range(&self, start: &[u8], end: &[u8]) -> Result<ScanResult, KVStoreError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_upper_bound(end.to_vec());
        self.collect(start, read_opts, |key| key < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RocksDbStore {
        RocksDbStore::open(RocksDbConfig::for_testing(dir.path().join("index"))).unwrap()
    }

    #[test]
    fn test_rocksdb_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open(&temp_dir);

        store.put(b"key1", b"value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert!(store.exists(b"key1").unwrap());
        assert!(!store.exists(b"nonexistent").unwrap());

        store.delete(b"key1").unwrap();
        assert!(!store.exists(b"key1").unwrap());
    }

    #[test]
    fn test_rocksdb_batch_write() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open(&temp_dir);
        store.put(b"gone", b"x").unwrap();

        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"batch1".to_vec(), b"value1".to_vec()),
                BatchOperation::put(b"batch2".to_vec(), b"value2".to_vec()),
                BatchOperation::delete(b"gone".to_vec()),
            ])
            .unwrap();

        assert!(store.exists(b"batch1").unwrap());
        assert!(store.exists(b"batch2").unwrap());
        assert!(!store.exists(b"gone").unwrap());
    }

    #[test]
    fn test_rocksdb_prefix_and_range_scans() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open(&temp_dir);

        for n in 0u64..5 {
            let mut key = b"bn".to_vec();
            key.extend_from_slice(&n.to_be_bytes());
            store.put(&key, &[n as u8]).unwrap();
        }
        store.put(b"txabc", b"t").unwrap();

        assert_eq!(store.prefix_scan(b"bn").unwrap().len(), 5);
        assert_eq!(store.prefix_scan(b"tx").unwrap().len(), 1);

        let mut start = b"bn".to_vec();
        start.extend_from_slice(&1u64.to_be_bytes());
        let mut end = b"bn".to_vec();
        end.extend_from_slice(&3u64.to_be_bytes());
        let values: Vec<u8> = store
            .range(&start, &end)
            .unwrap()
            .into_iter()
            .map(|(_, v)| v[0])
            .collect();
        assert_eq!(values, vec![1, 2]);
        assert!(store.range(&end, &start).unwrap().is_empty());
    }

    #[test]
    fn test_rocksdb_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut store = open(&temp_dir);
            store
                .atomic_batch_write(vec![BatchOperation::put(b"cp".to_vec(), b"1".to_vec())])
                .unwrap();
        }
        let store = open(&temp_dir);
        assert_eq!(store.get(b"cp").unwrap(), Some(b"1".to_vec()));
    }
}
