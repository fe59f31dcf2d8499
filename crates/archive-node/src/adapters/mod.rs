//! # Adapters
//!
//! Node-side implementations of the block store's driven ports.
//!
//! - `storage`: production `KeyValueStore` backends for the block index

pub mod storage;
