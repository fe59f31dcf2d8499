//! Tailing block iterator.

use shared_types::Block;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{BlockStore, OpenFile};
use crate::domain::errors::StorageError;
use crate::domain::value_objects::{BlockchainInfo, FileId};

/// Yields blocks in number order from a start number, waiting at the tail
/// for new blocks until cancelled.
///
/// Holds at most one file handle; crossing into the next file drops the
/// previous handle and with it any cache reference.
pub struct BlockIterator<'a> {
    store: &'a BlockStore,
    next: u64,
    info_rx: watch::Receiver<BlockchainInfo>,
    cancel: CancellationToken,
    current: Option<(FileId, OpenFile)>,
}

impl<'a> BlockIterator<'a> {
    pub(super) fn new(store: &'a BlockStore, from: u64, cancel: CancellationToken) -> Self {
        Self {
            store,
            next: from,
            info_rx: store.subscribe_info(),
            cancel,
            current: None,
        }
    }

    /// Number of the block the next call returns.
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Next block, waiting for it to be committed if needed.
    ///
    /// Returns `Cancelled` once the token fires while waiting or fetching.
    pub async fn next(&mut self) -> Result<Block, StorageError> {
        let number = self.next;
        self.wait_for_height(number + 1).await?;

        let entry = self.store.index().locate(number)?;
        let same_file = matches!(&self.current, Some((id, _)) if *id == entry.file_id);
        if !same_file {
            // Release the previous handle before acquiring the next one.
            self.current = None;
            let file = self.store.open_file(entry.file_id, &self.cancel).await?;
            self.current = Some((entry.file_id, file));
        }

        let bytes = match self.current.as_mut() {
            Some((_, file)) => file.read_at(&entry)?,
            None => return Err(StorageError::corruption("iterator lost its file handle")),
        };
        let block = BlockStore::decode(&bytes, number)?;
        self.next += 1;
        Ok(block)
    }

    async fn wait_for_height(&mut self, height: u64) -> Result<(), StorageError> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let wait = self.info_rx.wait_for(|info| info.height >= height);
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StorageError::Cancelled),
            r = wait => match r {
                Ok(_) => Ok(()),
                // Sender lives in the store, which outlives this iterator.
                Err(_) => Err(StorageError::Cancelled),
            },
        }
    }
}
