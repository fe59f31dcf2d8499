//! Storage Adapters
//!
//! Implementations of the `KeyValueStore` trait behind the block index.

mod file;
mod memory;

pub use file::FileBackedKVStore;
pub use memory::InMemoryKVStore;
