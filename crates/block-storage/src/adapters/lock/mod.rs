//! # Channel Directory Locking
//!
//! Prevents two processes from opening the same channel's block files.
//!
//! ## Modules
//!
//! - `flock`: DatabaseLock implementation using fs2
//! - `security`: Lock timeout and stale-lock detection

mod flock;
mod security;
#[cfg(test)]
mod tests;

pub use flock::{DatabaseLock, LockError};
