//! # Store Container
//!
//! Holds the block store of every configured channel for the lifetime of the
//! node.
//!
//! - Stores are opened in channel order; the first failure aborts startup
//! - Each store holds its channel directory lock until the container drops

pub mod config;
mod stores;

pub use config::{IndexBackend, NodeConfig, NodeConfigError};
pub use stores::StoreContainer;
