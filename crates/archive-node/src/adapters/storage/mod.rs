//! # Production Storage Adapters
//!
//! Index backends that live outside `block-storage`.
//!
//! ## Usage
//!
//! Enable the `rocksdb` feature and set `LEDGER_INDEX_BACKEND=rocksdb`:
//!
//! ```toml
//! archive-node = { path = "...", features = ["rocksdb"] }
//! ```
//!
//! Without the feature the node uses the file-backed index of `block-storage`.

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

#[cfg(feature = "rocksdb")]
pub use rocksdb_adapter::{RocksDbConfig, RocksDbStore};

pub use block_storage::adapters::{FileBackedKVStore, InMemoryKVStore};
