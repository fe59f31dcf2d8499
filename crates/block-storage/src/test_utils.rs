//! Chain builders and store constructors for tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use shared_types::{Block, Hash, Transaction, ZERO_HASH};

use crate::adapters::InMemoryArchiveClient;
use crate::domain::config::{StoreConfig, TransferPolicy};
use crate::domain::errors::StorageError;
use crate::ports::inbound::BlockStoreApi;
use crate::ports::outbound::ArchiveClient;
use crate::service::BlockStore;

pub const TEST_CHANNEL: &str = "testchannel";
pub const TEST_MSP: &str = "Org1MSP";

/// Deterministic signing key.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Transaction id of transaction `i` in block `number`.
pub fn tx_id(number: u64, i: usize) -> String {
    format!("tx-{:04}-{}", number, i)
}

/// Block `number` with `tx_count` transactions of `payload_len` bytes each.
pub fn make_block(number: u64, previous_hash: Hash, tx_count: usize, payload_len: usize) -> Block {
    let txs = (0..tx_count)
        .map(|i| Transaction::new(tx_id(number, i), vec![(number % 251) as u8; payload_len]))
        .collect();
    Block::new(number, previous_hash, txs)
}

/// A linked chain of `count` blocks, two transactions each.
pub fn make_chain(count: u64, payload_len: usize) -> Vec<Block> {
    extend_chain(&[], count, payload_len)
}

/// `count` blocks linked onto the end of `chain`.
pub fn extend_chain(chain: &[Block], count: u64, payload_len: usize) -> Vec<Block> {
    let (mut number, mut prev) = match chain.last() {
        Some(last) => (last.number() + 1, last.header_hash()),
        None => (0, ZERO_HASH),
    };
    let mut blocks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let block = make_block(number, prev, 2, payload_len);
        prev = block.header_hash();
        number += 1;
        blocks.push(block);
    }
    blocks
}

/// A chain whose blocks after genesis carry one signature by `key`.
pub fn make_signed_chain(count: u64, key: &SigningKey) -> Vec<Block> {
    let mut blocks = make_chain(count, 16);
    for block in blocks.iter_mut().skip(1) {
        block.sign(TEST_MSP, key);
    }
    blocks
}

/// Config rooted at `root` with a small file threshold and fast retries.
pub fn test_config(root: &Path, max_blockfile_size: u64) -> StoreConfig {
    StoreConfig::new(root)
        .with_max_blockfile_size(max_blockfile_size)
        .with_archive_dir(root.join("archive"))
        .with_cache(root.join("cache"), 2)
        .with_transfer(fast_transfer())
}

/// Three attempts, millisecond backoff, one second per attempt.
pub fn fast_transfer() -> TransferPolicy {
    TransferPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(1),
    }
}

/// Open a store with a persistent index and an optional archive transport.
pub fn open_store(
    config: StoreConfig,
    archive: Option<Arc<dyn ArchiveClient>>,
) -> Result<BlockStore, StorageError> {
    BlockStore::open_with_archive(TEST_CHANNEL, config, archive)
}

/// Open a store wired to `archive`.
pub fn open_store_with(
    config: StoreConfig,
    archive: &Arc<InMemoryArchiveClient>,
) -> Result<BlockStore, StorageError> {
    open_store(config, Some(archive.clone() as Arc<dyn ArchiveClient>))
}

/// Append every block, panicking on the first failure.
pub fn append_all(store: &BlockStore, blocks: &[Block]) {
    for block in blocks {
        if let Err(e) = store.add_block(block) {
            panic!("append of block {} failed: {}", block.number(), e);
        }
    }
}

/// Append blocks until `sealed` files are sealed locally. Returns the new blocks.
pub fn append_until_sealed(store: &BlockStore, sealed: usize) -> Vec<Block> {
    let mut appended = Vec::new();
    while store.sealed_files().map_or(0, |s| s.len()) < sealed {
        let info = store.blockchain_info();
        let block = make_block(info.height, info.current_block_hash, 2, 64);
        append_all(store, std::slice::from_ref(&block));
        appended.push(block);
    }
    appended
}

/// Flip one byte of the previous hash stored in block `number`, in place.
/// Returns the previous hash the block now decodes with.
pub fn corrupt_previous_hash(store: &BlockStore, number: u64) -> Result<Hash, StorageError> {
    let entry = store.block_location(number)?;
    let mut buf = unsigned_varint::encode::u64_buffer();
    let prefix = unsigned_varint::encode::u64(entry.length, &mut buf).len() as u64;
    // Header starts with the block number.
    let at = (entry.offset + prefix + 8) as usize;

    let path = store.file_path(entry.file_id);
    let mut bytes = std::fs::read(&path)?;
    let Some(byte) = bytes.get_mut(at) else {
        return Err(StorageError::not_found(format!("block {} bytes", number)));
    };
    *byte ^= 0xFF;
    std::fs::write(&path, &bytes)?;

    let block_bytes = bytes
        .get(at - 8..at - 8 + entry.length as usize)
        .ok_or_else(|| StorageError::not_found(format!("block {} bytes", number)))?;
    Ok(Block::from_bytes(block_bytes)?.previous_hash())
}
