//! # Ports Layer
//!
//! Defines the port traits for the block store.
//!
//! ## Hexagonal Architecture
//!
//! - `inbound.rs` - Driving ports (API exposed to the node and tools)
//! - `outbound.rs` - Driven ports (index backend, archive transport)

pub mod inbound;
pub mod outbound;
