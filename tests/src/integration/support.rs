//! Shared fixtures for the scenarios.

use std::sync::Arc;

use block_storage::adapters::InMemoryArchiveClient;
use block_storage::test_utils::{open_store_with, test_config};
use block_storage::{ArchiveController, BlockStore, FileId};
use tempfile::TempDir;

/// Archiver node over an in-memory archive.
pub struct ArchiverNode {
    pub dir: TempDir,
    pub archive: Arc<InMemoryArchiveClient>,
    pub store: Arc<BlockStore>,
    pub controller: ArchiveController,
}

impl ArchiverNode {
    pub fn new(max_blockfile_size: u64, keep: usize, each: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let archive = Arc::new(InMemoryArchiveClient::new());
        let (store, controller) = open(&dir, &archive, max_blockfile_size, keep, each);
        Self {
            dir,
            archive,
            store,
            controller,
        }
    }

    /// Drop the store and open it again on the same directory and archive.
    pub fn restart(self, max_blockfile_size: u64, keep: usize, each: usize) -> Self {
        self.shutdown().reopen(max_blockfile_size, keep, each)
    }

    /// Drop the store, releasing the channel lock. The directory and the
    /// archive outlive it.
    pub fn shutdown(self) -> StoppedNode {
        let Self {
            dir,
            archive,
            store,
            controller,
        } = self;
        drop(controller);
        drop(store);
        StoppedNode { dir, archive }
    }

    /// Block numbers stored in `file_id`, from the index.
    pub fn blocks_in(&self, file_id: FileId) -> Vec<u64> {
        use block_storage::BlockStoreApi;
        (0..self.store.blockchain_info().height)
            .filter(|n| self.store.block_location(*n).unwrap().file_id == file_id)
            .collect()
    }
}

/// Node state between a shutdown and the next open.
pub struct StoppedNode {
    pub dir: TempDir,
    pub archive: Arc<InMemoryArchiveClient>,
}

impl StoppedNode {
    pub fn reopen(self, max_blockfile_size: u64, keep: usize, each: usize) -> ArchiverNode {
        let (store, controller) = open(&self.dir, &self.archive, max_blockfile_size, keep, each);
        ArchiverNode {
            dir: self.dir,
            archive: self.archive,
            store,
            controller,
        }
    }
}

fn open(
    dir: &TempDir,
    archive: &Arc<InMemoryArchiveClient>,
    max_blockfile_size: u64,
    keep: usize,
    each: usize,
) -> (Arc<BlockStore>, ArchiveController) {
    let config = test_config(dir.path(), max_blockfile_size).with_archiver(keep, each);
    let store = Arc::new(open_store_with(config, archive).unwrap());
    let controller = ArchiveController::for_store(store.clone()).unwrap();
    (store, controller)
}
