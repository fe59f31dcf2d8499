//! # Shared Types Crate
//!
//! Block entities shared by the block store, the node runtime and the audit
//! tooling.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the canonical byte form of a block is
//!   produced here and nowhere else.
//! - **Reproducible Hashing**: `BlockHeader::hash` is computed from the header
//!   fields only, so any party holding the canonical bytes can recompute it.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
