//! # Inbound Ports (Driving Ports)
//!
//! The primary API of the block store, used by the commit pipeline, by
//! readers and by the chain verifier.

use async_trait::async_trait;
use shared_types::Block;

use crate::domain::errors::StorageError;
use crate::domain::value_objects::BlockchainInfo;

/// Primary API of a channel's block store.
///
/// Implementations must keep block numbers contiguous from 0 and each
/// block linked to its predecessor's header hash.
#[async_trait]
pub trait BlockStoreApi: Send + Sync {
    /// Append the next block.
    ///
    /// ## Atomicity
    ///
    /// The file append, index entries and checkpoint advance land together.
    /// Crossing the size threshold seals the active file in the same step.
    ///
    /// ## Errors
    ///
    /// - `ChainBreak`: number is not `last + 1` or previous hash mismatches
    /// - `IoFailure`: the append or its fsync failed
    fn add_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Read block `number`, fetching its file from the archive if needed.
    ///
    /// ## Errors
    ///
    /// - `NotFound`: no such block
    /// - `Corruption`: the record disagrees with the index
    /// - `ArchiveUnavailable`: the file is archived and cannot be fetched
    async fn retrieve_block_by_number(&self, number: u64) -> Result<Block, StorageError>;

    /// Read the block holding transaction `tx_id`.
    async fn retrieve_block_by_tx_id(&self, tx_id: &str) -> Result<Block, StorageError>;

    /// Height and last two header hashes.
    fn blockchain_info(&self) -> BlockchainInfo;
}
