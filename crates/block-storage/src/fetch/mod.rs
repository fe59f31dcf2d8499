//! # Fetch Coordinator
//!
//! Materializes archived block files in a local cache directory on demand.
//!
//! ## Single-Flight
//!
//! At most one download per file id runs at any instant. The first caller
//! registers a watch channel in `in_flight` and spawns the download; later
//! callers for the same id wait on that channel. The download task is not
//! tied to any caller, so a caller that cancels only stops waiting.
//!
//! Each flight counts its waiters. The task inserts the finished file with
//! one reference per waiter and publishes the outcome under the cache lock,
//! so no waiter can find its file already evicted.
//!
//! ## Cache
//!
//! Cached files are handed out as reference-counted `CachedFile` handles.
//! When the cache holds more than `max_files`, the least recently read file
//! with no live handle is deleted. All cache mutations happen under one lock.


use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::adapters::archive::is_temp_name;
use crate::domain::config::{TransferPolicy, MIN_CACHE_FILES};
use crate::domain::errors::StorageError;
use crate::domain::metrics::ArchiveMetrics;
use crate::domain::retry::with_retry;
use crate::domain::value_objects::{block_file_name, parse_block_file_name, FileId};
use crate::ports::outbound::ArchiveClient;

/// Result of one download, shared with every waiter.
type Outcome = Option<Result<(), String>>;

struct CacheEntry {
    refs: usize,
    last_used: u64,
}

struct Flight {
    rx: watch::Receiver<Outcome>,
    waiters: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<FileId, CacheEntry>,
    in_flight: HashMap<FileId, Flight>,
    clock: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

struct Inner {
    cache_dir: PathBuf,
    max_files: usize,
    client: Arc<dyn ArchiveClient>,
    transfer: TransferPolicy,
    metrics: Arc<ArchiveMetrics>,
    state: Mutex<CacheState>,
    shutdown: CancellationToken,
}

impl Inner {
    fn path_of(&self, file_id: FileId) -> PathBuf {
        self.cache_dir.join(block_file_name(file_id))
    }

    /// Delete least recently used unreferenced files until within budget.
    fn evict(&self, state: &mut CacheState) {
        while state.entries.len() > self.max_files {
            let victim = state
                .entries
                .iter()
                .filter(|(_, e)| e.refs == 0)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| *id);
            let Some(file_id) = victim else {
                break;
            };
            state.entries.remove(&file_id);
            if let Err(e) = std::fs::remove_file(self.path_of(file_id)) {
                tracing::warn!(file_id, error = %e, "[fetch] failed to delete evicted file");
            }
            self.metrics.record_cache_eviction();
            tracing::debug!(file_id, "[fetch] evicted from cache");
        }
    }

    fn release(&self, file_id: FileId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(&file_id) {
            entry.refs = entry.refs.saturating_sub(1);
        }
        self.evict(&mut state);
    }

    /// Withdraw a waiter that stopped before seeing the outcome of its flight.
    fn abandon(&self, file_id: FileId, rx: &watch::Receiver<Outcome>) {
        let mut state = self.state.lock();
        if let Some(flight) = state
            .in_flight
            .get_mut(&file_id)
            .filter(|flight| flight.rx.same_channel(rx))
        {
            flight.waiters = flight.waiters.saturating_sub(1);
            return;
        }
        // The flight already landed and counted a reference for this waiter.
        let delivered = matches!(*rx.borrow(), Some(Ok(())));
        drop(state);
        if delivered {
            self.release(file_id);
        }
    }
}

/// A caller waiting on a flight. Dropping it before the outcome is seen
/// withdraws the caller.
struct Waiter {
    inner: Arc<Inner>,
    file_id: FileId,
    rx: watch::Receiver<Outcome>,
    settled: bool,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.abandon(self.file_id, &self.rx);
        }
    }
}

/// Read handle on a cached copy of an archived file.
///
/// The file is not evicted while a handle is alive.
pub struct CachedFile {
    file_id: FileId,
    path: PathBuf,
    inner: Arc<Inner>,
}

impl CachedFile {
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        self.inner.release(self.file_id);
    }
}

impl std::fmt::Debug for CachedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .finish()
    }
}

/// Fetch-on-miss coordinator for one channel.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl FetchCoordinator {
    /// Open the cache at `cache_dir`.
    ///
    /// Leftover `.tmp` files are removed and complete files from a previous
    /// run are adopted.
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        max_files: usize,
        client: Arc<dyn ArchiveClient>,
        transfer: TransferPolicy,
        metrics: Arc<ArchiveMetrics>,
    ) -> Result<Self, StorageError> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;

        let mut state = CacheState::default();
        let mut adopted: Vec<FileId> = Vec::new();
        for dirent in std::fs::read_dir(&cache_dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let name = name.to_string_lossy();
            if is_temp_name(&name) {
                let _ = std::fs::remove_file(dirent.path());
            } else if let Some(file_id) = parse_block_file_name(&name) {
                adopted.push(file_id);
            }
        }
        adopted.sort_unstable();
        for file_id in adopted {
            let last_used = state.tick();
            state.entries.insert(
                file_id,
                CacheEntry {
                    refs: 0,
                    last_used,
                },
            );
        }

        let inner = Arc::new(Inner {
            cache_dir,
            max_files: max_files.max(MIN_CACHE_FILES),
            client,
            transfer,
            metrics,
            state: Mutex::new(state),
            shutdown: CancellationToken::new(),
        });
        {
            let mut state = inner.state.lock();
            if !state.entries.is_empty() {
                tracing::info!(
                    cached = state.entries.len(),
                    dir = %inner.cache_dir.display(),
                    "[fetch] adopted cached files"
                );
            }
            inner.evict(&mut state);
        }

        Ok(Self { inner })
    }

    /// Handle on a local copy of archived file `file_id`, downloading it if needed.
    ///
    /// Fails with `ArchiveUnavailable` when the download fails after retries
    /// and with `Cancelled` when `cancel` fires first.
    pub async fn acquire(
        &self,
        file_id: FileId,
        cancel: &CancellationToken,
    ) -> Result<CachedFile, StorageError> {
        let rx = {
            let mut state = self.inner.state.lock();
            let now = state.tick();
            if let Some(entry) = state.entries.get_mut(&file_id) {
                entry.refs += 1;
                entry.last_used = now;
                self.inner.metrics.record_cache_hit();
                return Ok(self.handle(file_id));
            }
            match state.in_flight.get_mut(&file_id) {
                Some(flight) => {
                    flight.waiters += 1;
                    flight.rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight.insert(
                        file_id,
                        Flight {
                            rx: rx.clone(),
                            waiters: 1,
                        },
                    );
                    self.spawn_download(file_id, tx);
                    rx
                }
            }
        };
        let mut waiter = Waiter {
            inner: self.inner.clone(),
            file_id,
            rx,
            settled: false,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            r = waiter.rx.wait_for(|o| o.is_some()) => r.map(|o| o.clone()),
        };
        waiter.settled = true;

        match outcome {
            // The download task already counted our reference.
            Ok(Some(Ok(()))) => Ok(self.handle(file_id)),
            Ok(Some(Err(message))) => Err(StorageError::ArchiveUnavailable { file_id, message }),
            Ok(None) | Err(_) => {
                let mut state = self.inner.state.lock();
                if state
                    .in_flight
                    .get(&file_id)
                    .is_some_and(|current| current.rx.same_channel(&waiter.rx))
                {
                    state.in_flight.remove(&file_id);
                }
                Err(StorageError::ArchiveUnavailable {
                    file_id,
                    message: "download task ended without a result".to_string(),
                })
            }
        }
    }

    fn handle(&self, file_id: FileId) -> CachedFile {
        CachedFile {
            file_id,
            path: self.inner.path_of(file_id),
            inner: self.inner.clone(),
        }
    }

    fn spawn_download(&self, file_id: FileId, tx: watch::Sender<Outcome>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.metrics.record_download_started();
            let dest = inner.path_of(file_id);
            tracing::info!(
                file_id,
                archive = %inner.client.describe(),
                "[fetch] downloading archived file"
            );

            let result = with_retry(&inner.transfer, &inner.shutdown, "download", file_id, || {
                inner.client.download(file_id, &dest)
            })
            .await;

            let outcome = match result {
                Ok(()) => Ok(()),
                Err(e) => {
                    inner.metrics.record_download_failure();
                    tracing::error!(file_id, error = %e, "[fetch] download failed");
                    Err(e.to_string())
                }
            };

            let mut state = inner.state.lock();
            let waiters = state
                .in_flight
                .remove(&file_id)
                .map_or(0, |flight| flight.waiters);
            if outcome.is_ok() {
                let last_used = state.tick();
                state.entries.insert(
                    file_id,
                    CacheEntry {
                        refs: waiters,
                        last_used,
                    },
                );
                inner.evict(&mut state);
            }
            let _ = tx.send(Some(outcome));
        });
    }

    /// Whether `file_id` has a complete copy in the cache.
    pub fn is_cached(&self, file_id: FileId) -> bool {
        self.inner.state.lock().entries.contains_key(&file_id)
    }

    /// Cached file ids, ascending.
    pub fn cached_files(&self) -> Vec<FileId> {
        let mut ids: Vec<_> = self.inner.state.lock().entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Live handles on `file_id`.
    pub fn ref_count(&self, file_id: FileId) -> usize {
        self.inner
            .state
            .lock()
            .entries
            .get(&file_id)
            .map_or(0, |e| e.refs)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    /// Abort running downloads; their waiters see `ArchiveUnavailable`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}
