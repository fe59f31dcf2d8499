//! # Domain Layer
//!
//! Block file format, index schema, configuration and error types of the
//! block store. No async code lives here except the transfer retry helper.
//!
//! ## Modules
//!
//! - `blockfile` - Append-only block file writer, reader and scanner
//! - `index` - Block index over a `KeyValueStore`
//! - `value_objects` - File entries, statuses, checkpoint, key layout
//! - `config` - `StoreConfig` and environment parsing
//! - `errors` - Domain error types
//! - `metrics` - Archive counters
//! - `retry` - Bounded retry for archive transfers

pub mod blockfile;
pub mod config;
pub mod errors;
pub mod index;
pub mod metrics;
pub mod retry;
pub mod value_objects;
