//! # Integration Scenarios
//!
//! Each module drives a full `BlockStore` on a temporary directory. Archive
//! traffic goes through `InMemoryArchiveClient` unless a scenario needs the
//! filesystem transport.

#[cfg(test)]
mod support;

pub mod archive_and_fetch;
pub mod chain_verification;
pub mod crash_recovery;
pub mod seal_and_roll;
pub mod upload_failure;
