//! # Block Store Service
//!
//! The per-channel block store: appends blocks to the active file, rolls
//! files at the size threshold, serves reads (through the fetch coordinator
//! when a file is archived) and exposes a tailing block iterator.
//!
//! ## Concurrency
//!
//! - One writer at a time: `add_block` holds the writer mutex around the
//!   active file append and the index batch
//! - Readers never take the writer mutex; they open their own descriptors
//! - The archive controller takes the writer mutex only to observe sealed
//!   files, never across archive I/O

mod iterator;
mod recovery;

pub use iterator::BlockIterator;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::Block;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "locking")]
use crate::adapters::lock::DatabaseLock;
use crate::adapters::{FileBackedKVStore, FsArchiveClient};
use crate::domain::blockfile::{BlockFileReader, BlockFileWriter};
use crate::domain::config::StoreConfig;
use crate::domain::errors::{ChainBreakKind, StorageError};
use crate::domain::index::{BlockIndex, IndexBatch};
use crate::domain::metrics::{ArchiveMetrics, MetricsSnapshot};
use crate::domain::value_objects::{
    block_file_name, BlockchainInfo, Checkpoint, FileEntry, FileId, FileState, FileStatus,
    StoreEvent, StoreRole,
};
use crate::fetch::{CachedFile, FetchCoordinator};
use crate::ports::inbound::BlockStoreApi;
use crate::ports::outbound::{ArchiveClient, KeyValueStore};

const EVENT_CAPACITY: usize = 64;

/// Dependencies for `BlockStore`.
pub struct BlockStoreDependencies {
    /// Backend of the block index.
    pub kv_store: Box<dyn KeyValueStore>,
    /// Archive transport; defaults to `FsArchiveClient` on the configured
    /// archive directory when the role needs one.
    pub archive: Option<Arc<dyn ArchiveClient>>,
}

struct WriterState {
    /// `None` after a failed roll-over; reopened on the next append.
    file: Option<BlockFileWriter>,
    checkpoint: Checkpoint,
}

/// An open block file: a local sealed/active file or a cached archive copy.
pub(crate) struct OpenFile {
    reader: BlockFileReader,
    /// Keeps the cached copy from eviction while the reader is in use.
    _cached: Option<CachedFile>,
}

impl OpenFile {
    fn read_at(&mut self, entry: &FileEntry) -> Result<Vec<u8>, StorageError> {
        self.reader.read_at(entry.offset, entry.length)
    }
}

/// Exclusive hold on a channel directory for the life of the store.
struct ChannelGuard {
    #[cfg(feature = "locking")]
    _lock: DatabaseLock,
}

impl ChannelGuard {
    fn acquire(chain_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(chain_dir)?;
        Ok(Self {
            #[cfg(feature = "locking")]
            _lock: DatabaseLock::acquire(chain_dir)?,
        })
    }
}

/// Block store for one channel.
pub struct BlockStore {
    channel: String,
    config: StoreConfig,
    role: StoreRole,
    chain_dir: PathBuf,
    index: BlockIndex,
    writer: Mutex<WriterState>,
    info_tx: watch::Sender<BlockchainInfo>,
    events: broadcast::Sender<StoreEvent>,
    archive: Option<Arc<dyn ArchiveClient>>,
    fetcher: Option<FetchCoordinator>,
    metrics: Arc<ArchiveMetrics>,
    read_only: bool,
    _guard: ChannelGuard,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("channel", &self.channel)
            .field("role", &self.role)
            .field("chain_dir", &self.chain_dir)
            .field("height", &self.info_tx.borrow().height)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl BlockStore {
    /// Open the store for `channel`, recovering the index against the files on disk.
    ///
    /// Fails with `DatabaseLocked` when another process holds the channel
    /// directory and with `Corruption` when reconciliation finds the index
    /// and the files irreconcilable.
    pub fn open(
        channel: &str,
        config: StoreConfig,
        deps: BlockStoreDependencies,
    ) -> Result<Self, StorageError> {
        let guard = ChannelGuard::acquire(&config.chain_dir(channel))?;
        Self::open_guarded(channel, config, deps, guard, false)
    }

    /// Open with a `FileBackedKVStore` index under `<root>/index/<channel>`.
    ///
    /// The channel lock is taken before the index log is replayed.
    pub fn open_with_archive(
        channel: &str,
        config: StoreConfig,
        archive: Option<Arc<dyn ArchiveClient>>,
    ) -> Result<Self, StorageError> {
        let guard = ChannelGuard::acquire(&config.chain_dir(channel))?;
        let kv_store = FileBackedKVStore::open(config.index_dir(channel))?;
        Self::open_guarded(
            channel,
            config,
            BlockStoreDependencies {
                kv_store: Box::new(kv_store),
                archive,
            },
            guard,
            false,
        )
    }

    /// `open_with_archive` with the role's default archive transport.
    pub fn open_default(channel: &str, config: StoreConfig) -> Result<Self, StorageError> {
        Self::open_with_archive(channel, config, None)
    }

    /// Open an existing ledger for auditing.
    ///
    /// Nothing is repaired: block files are not truncated or re-indexed, the
    /// index log is not compacted and archived local copies are kept.
    /// Disagreements between the index and the files fail with `Corruption`.
    /// Writes fail with `ReadOnly`. Archived files are still fetched into
    /// the cache when the role allows it.
    pub fn open_read_only(channel: &str, config: StoreConfig) -> Result<Self, StorageError> {
        let chain_dir = config.chain_dir(channel);
        if !chain_dir.is_dir() {
            return Err(StorageError::not_found(format!(
                "ledger of channel {} under {}",
                channel,
                config.root_dir.display()
            )));
        }
        let guard = ChannelGuard::acquire(&chain_dir)?;
        let kv_store = FileBackedKVStore::open_read_only(config.index_dir(channel))?;
        Self::open_guarded(
            channel,
            config,
            BlockStoreDependencies {
                kv_store: Box::new(kv_store),
                archive: None,
            },
            guard,
            true,
        )
    }

    fn open_guarded(
        channel: &str,
        config: StoreConfig,
        deps: BlockStoreDependencies,
        guard: ChannelGuard,
        read_only: bool,
    ) -> Result<Self, StorageError> {
        let role = config.role();
        let chain_dir = config.chain_dir(channel);
        let index = BlockIndex::new(deps.kv_store);
        let recovered = if read_only {
            recovery::inspect(&index, &chain_dir)?
        } else {
            recovery::recover(&index, &chain_dir, config.max_blockfile_size)?
        };

        let metrics = Arc::new(ArchiveMetrics::new());
        let archive = match (deps.archive, role) {
            (Some(client), _) => Some(client),
            (None, StoreRole::Standalone) => None,
            (None, _) => Some(Arc::new(FsArchiveClient::new(
                config.archive_dir(channel),
                config.block_archiver.url.clone(),
            )) as Arc<dyn ArchiveClient>),
        };
        let fetcher = match (&archive, role.fetches_on_miss()) {
            (Some(client), true) => Some(FetchCoordinator::new(
                config.cache_dir(channel),
                config.cache_max_files(),
                client.clone(),
                config.transfer,
                metrics.clone(),
            )?),
            _ => None,
        };

        let info = BlockchainInfo::from(&recovered.checkpoint);
        let (info_tx, _) = watch::channel(info);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::info!(
            channel,
            height = info.height,
            active_file = recovered.checkpoint.active_file_id,
            reindexed = recovered.reindexed,
            role = ?role,
            read_only,
            "[block-storage] store opened"
        );

        Ok(Self {
            channel: channel.to_string(),
            config,
            role,
            chain_dir,
            index,
            writer: Mutex::new(WriterState {
                file: recovered.writer,
                checkpoint: recovered.checkpoint,
            }),
            info_tx,
            events,
            archive,
            fetcher,
            metrics,
            read_only,
            _guard: guard,
        })
    }

    // =========================================================================
    // WRITE PATH
    // =========================================================================

    fn append(&self, block: &Block) -> Result<(), StorageError> {
        self.check_writable()?;
        let bytes = block.to_bytes()?;
        let mut writer = self.writer.lock();
        let WriterState { file, checkpoint } = &mut *writer;

        let expected = checkpoint.height();
        if block.number() != expected {
            return Err(StorageError::ChainBreak {
                number: block.number(),
                kind: ChainBreakKind::OutOfOrder {
                    expected,
                    actual: block.number(),
                },
            });
        }
        if expected > 0 && block.previous_hash() != checkpoint.last_block_hash {
            return Err(StorageError::ChainBreak {
                number: block.number(),
                kind: ChainBreakKind::HashMismatch {
                    expected: checkpoint.last_block_hash,
                    actual: block.previous_hash(),
                },
            });
        }

        if file.is_none() {
            *file = Some(BlockFileWriter::open(
                &self.file_path(checkpoint.active_file_id),
                checkpoint.active_file_size,
            )?);
        }
        let Some(active) = file.as_mut() else {
            return Err(StorageError::IoFailure {
                message: "active file unavailable".to_string(),
            });
        };

        let offset = active.append(&bytes)?;
        let entry = FileEntry {
            file_id: checkpoint.active_file_id,
            offset,
            length: bytes.len() as u64,
        };

        let mut next = checkpoint.clone();
        next.active_file_size = active.size();
        next.previous_block_hash = checkpoint.last_block_hash;
        next.last_block_hash = block.header_hash();
        next.last_block_number = Some(block.number());

        let mut batch = IndexBatch::new();
        batch.put_block(block.number(), entry);
        for tx_id in block.tx_ids() {
            if !self.index.has_tx(tx_id)? {
                batch.put_tx(tx_id, entry);
            }
        }

        let sealed = next.active_file_size > self.config.max_blockfile_size;
        if sealed {
            batch.set_status(entry.file_id, FileStatus::Sealed);
            next.active_file_id = entry.file_id + 1;
            next.active_file_size = 0;
        }
        batch.set_checkpoint(&next)?;

        if let Err(e) = self.index.commit(batch) {
            if let Err(undo) = active.truncate(offset) {
                tracing::error!(error = %undo, "[block-storage] failed to undo append");
                *file = None;
            }
            return Err(e);
        }
        *checkpoint = next;

        if sealed {
            *file = None;
            match BlockFileWriter::open(&self.file_path(checkpoint.active_file_id), 0) {
                Ok(new_file) => *file = Some(new_file),
                Err(e) => tracing::warn!(
                    file_id = checkpoint.active_file_id,
                    error = %e,
                    "[block-storage] failed to create next block file; retrying on next append"
                ),
            }
        }

        self.metrics.record_block_committed();
        self.info_tx.send_replace(BlockchainInfo::from(&*checkpoint));

        if sealed {
            self.metrics.record_file_sealed();
            tracing::info!(
                channel = %self.channel,
                file_id = entry.file_id,
                last_block = block.number(),
                "[block-storage] block file sealed"
            );
            // No receivers is fine; the controller may not be running.
            let _ = self.events.send(StoreEvent::FileSealed(entry.file_id));
        }
        Ok(())
    }

    // =========================================================================
    // READ PATH
    // =========================================================================

    /// Canonical bytes of block `number`, exactly as appended.
    pub async fn retrieve_block_bytes_by_number(&self, number: u64) -> Result<Vec<u8>, StorageError> {
        let entry = self.index.locate(number)?;
        let mut file = self.open_file(entry.file_id, &CancellationToken::new()).await?;
        file.read_at(&entry)
    }

    /// Where block `number` is stored.
    pub fn block_location(&self, number: u64) -> Result<FileEntry, StorageError> {
        self.index.locate(number)
    }

    /// Blocks from `from` onwards, following the tail of the chain.
    pub fn retrieve_blocks(&self, from: u64, cancel: CancellationToken) -> BlockIterator<'_> {
        BlockIterator::new(self, from, cancel)
    }

    pub(crate) fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub(crate) fn subscribe_info(&self) -> watch::Receiver<BlockchainInfo> {
        self.info_tx.subscribe()
    }

    /// Open `file_id` for reading, from local disk or through the fetch cache.
    pub(crate) async fn open_file(
        &self,
        file_id: FileId,
        cancel: &CancellationToken,
    ) -> Result<OpenFile, StorageError> {
        if self.index.file_status(file_id)? != Some(FileStatus::Archived) {
            match BlockFileReader::open(&self.file_path(file_id)) {
                Ok(reader) => {
                    return Ok(OpenFile {
                        reader,
                        _cached: None,
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Archived and unlinked between the status read and the open.
                    if self.index.file_status(file_id)? != Some(FileStatus::Archived) {
                        return Err(StorageError::corruption(format!(
                            "block file {} missing from {}",
                            file_id,
                            self.chain_dir.display()
                        )));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some(fetcher) = &self.fetcher else {
            return Err(StorageError::ArchiveUnavailable {
                file_id,
                message: format!("file is archived and role {:?} does not fetch", self.role),
            });
        };
        let cached = fetcher.acquire(file_id, cancel).await?;
        let reader = BlockFileReader::open(cached.path())?;
        Ok(OpenFile {
            reader,
            _cached: Some(cached),
        })
    }

    fn decode(bytes: &[u8], number: u64) -> Result<Block, StorageError> {
        let block = Block::from_bytes(bytes)?;
        if block.number() != number {
            return Err(StorageError::corruption(format!(
                "index entry for block {} holds block {}",
                number,
                block.number()
            )));
        }
        Ok(block)
    }

    // =========================================================================
    // ARCHIVE SUPPORT
    // =========================================================================

    /// Local sealed files, ascending. Observed under the writer lock.
    pub fn sealed_files(&self) -> Result<Vec<FileId>, StorageError> {
        let _writer = self.writer.lock();
        self.index.sealed_files()
    }

    /// Record `file_id` as archived, then drop the local copy.
    ///
    /// The index is authoritative: a failed unlink only logs, and recovery
    /// removes the file on the next open.
    pub fn complete_archive(&self, file_id: FileId) -> Result<(), StorageError> {
        self.check_writable()?;
        self.index.mark_archived(file_id)?;
        self.metrics.record_file_archived();
        let path = self.file_path(file_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                file_id,
                error = %e,
                "[archiver] archived file could not be removed locally"
            ),
        }
        Ok(())
    }

    /// Every known file with its state, ascending.
    pub fn file_states(&self) -> Result<Vec<(FileId, FileState)>, StorageError> {
        let active = self.writer.lock().checkpoint.active_file_id;
        let mut states: Vec<(FileId, FileState)> = self
            .index
            .file_statuses()?
            .into_iter()
            .map(|(file_id, status)| {
                let state = match status {
                    FileStatus::Sealed => FileState::SealedLocal,
                    FileStatus::Archived
                        if self.fetcher.as_ref().is_some_and(|f| f.is_cached(file_id)) =>
                    {
                        FileState::ArchivedCached
                    }
                    FileStatus::Archived => FileState::ArchivedOnly,
                };
                (file_id, state)
            })
            .collect();
        states.push((active, FileState::Active));
        states.sort_by_key(|(id, _)| *id);
        Ok(states)
    }

    /// Subscribe to `FileSealed` signals, delivered in sealing order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Canonical path of `file_id` in the channel directory.
    pub fn file_path(&self, file_id: FileId) -> PathBuf {
        self.chain_dir.join(block_file_name(file_id))
    }

    pub fn chain_dir(&self) -> &Path {
        &self.chain_dir
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn archive_client(&self) -> Option<Arc<dyn ArchiveClient>> {
        self.archive.clone()
    }

    pub fn fetcher(&self) -> Option<&FetchCoordinator> {
        self.fetcher.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly {
                channel: self.channel.clone(),
            });
        }
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn metrics_handle(&self) -> &Arc<ArchiveMetrics> {
        &self.metrics
    }
}

#[async_trait]
impl BlockStoreApi for BlockStore {
    fn add_block(&self, block: &Block) -> Result<(), StorageError> {
        self.append(block)
    }

    async fn retrieve_block_by_number(&self, number: u64) -> Result<Block, StorageError> {
        let bytes = self.retrieve_block_bytes_by_number(number).await?;
        Self::decode(&bytes, number)
    }

    async fn retrieve_block_by_tx_id(&self, tx_id: &str) -> Result<Block, StorageError> {
        let entry = self.index.locate_by_tx(tx_id)?;
        let mut file = self.open_file(entry.file_id, &CancellationToken::new()).await?;
        let block = Block::from_bytes(&file.read_at(&entry)?)?;
        if !block.tx_ids().any(|id| id == tx_id) {
            return Err(StorageError::corruption(format!(
                "index entry for transaction {} points at block {} which lacks it",
                tx_id,
                block.number()
            )));
        }
        Ok(block)
    }

    fn blockchain_info(&self) -> BlockchainInfo {
        *self.info_tx.borrow()
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        if let Some(fetcher) = &self.fetcher {
            fetcher.shutdown();
        }
    }
}
