//! # Error Types
//!
//! Errors raised while encoding or decoding shared entities.

use thiserror::Error;

/// Errors produced by the canonical block codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The block could not be serialized.
    #[error("Block encoding failed: {0}")]
    Encode(String),

    /// The bytes are not a canonical block.
    #[error("Block decoding failed: {0}")]
    Decode(String),

    /// Decoding succeeded but re-encoding yields different bytes.
    #[error("Non-canonical block encoding ({decoded_len} bytes decoded, {canonical_len} canonical)")]
    NonCanonical {
        decoded_len: usize,
        canonical_len: usize,
    },
}
