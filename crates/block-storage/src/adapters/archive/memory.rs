//! In-memory archive transport for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use shared_types::Hash;

use super::fs::temp_file_for;
use crate::domain::errors::ArchiveClientError;
use crate::domain::value_objects::FileId;
use crate::ports::outbound::ArchiveClient;

/// Archive held in a map, with call counters and failure injection.
#[derive(Default)]
pub struct InMemoryArchiveClient {
    files: Mutex<HashMap<FileId, Vec<u8>>>,
    upload_calls: AtomicUsize,
    download_calls: AtomicUsize,
    exists_calls: AtomicUsize,
    /// Per file: (downloads running now, highest value seen).
    concurrency: Mutex<HashMap<FileId, (usize, usize)>>,
    downloads_by_file: Mutex<HashMap<FileId, usize>>,
    fail_uploads: AtomicU32,
    fail_downloads: AtomicU32,
    absent_after_upload: AtomicBool,
    corrupt_uploads: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryArchiveClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a blob directly into the archive.
    pub fn insert(&self, file_id: FileId, bytes: Vec<u8>) {
        self.files.lock().insert(file_id, bytes);
    }

    pub fn contains(&self, file_id: FileId) -> bool {
        self.files.lock().contains_key(&file_id)
    }

    pub fn file_bytes(&self, file_id: FileId) -> Option<Vec<u8>> {
        self.files.lock().get(&file_id).cloned()
    }

    /// Ids held by the archive, ascending.
    pub fn file_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<_> = self.files.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    /// Downloads of `file_id` so far.
    pub fn downloads_of(&self, file_id: FileId) -> usize {
        self.downloads_by_file
            .lock()
            .get(&file_id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous downloads of `file_id` observed.
    pub fn peak_concurrent_downloads(&self, file_id: FileId) -> usize {
        self.concurrency
            .lock()
            .get(&file_id)
            .map_or(0, |(_, peak)| *peak)
    }

    /// Fail the next `n` uploads.
    pub fn fail_next_uploads(&self, n: u32) {
        self.fail_uploads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` downloads.
    pub fn fail_next_downloads(&self, n: u32) {
        self.fail_downloads.store(n, Ordering::SeqCst);
    }

    /// Accept uploads without storing them, so `exists` stays false.
    pub fn set_absent_after_upload(&self, absent: bool) {
        self.absent_after_upload.store(absent, Ordering::SeqCst);
    }

    /// Store a truncated copy on upload, as a transfer cut short would.
    pub fn set_corrupt_uploads(&self, corrupt: bool) {
        self.corrupt_uploads.store(corrupt, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn do_download(&self, file_id: FileId, dest_path: &Path) -> Result<(), ArchiveClientError> {
        self.delay().await;
        if Self::take_failure(&self.fail_downloads) {
            return Err(ArchiveClientError::Io {
                message: "injected download failure".to_string(),
            });
        }
        let bytes = self
            .file_bytes(file_id)
            .ok_or(ArchiveClientError::NotPresent { file_id })?;

        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = temp_file_for(dest_path)?.into_temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tmp.persist(dest_path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveClient for InMemoryArchiveClient {
    async fn upload(&self, file_id: FileId, local_path: &Path) -> Result<(), ArchiveClientError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if Self::take_failure(&self.fail_uploads) {
            return Err(ArchiveClientError::Io {
                message: "injected upload failure".to_string(),
            });
        }
        if self.absent_after_upload.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut bytes = tokio::fs::read(local_path).await?;
        if self.file_bytes(file_id).as_ref() == Some(&bytes) {
            return Ok(());
        }
        if self.corrupt_uploads.load(Ordering::SeqCst) {
            bytes.truncate(bytes.len() / 2);
        }
        self.insert(file_id, bytes);
        Ok(())
    }

    async fn download(&self, file_id: FileId, dest_path: &Path) -> Result<(), ArchiveClientError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        *self.downloads_by_file.lock().entry(file_id).or_insert(0) += 1;

        {
            let mut concurrency = self.concurrency.lock();
            let (active, peak) = concurrency.entry(file_id).or_insert((0, 0));
            *active += 1;
            *peak = (*peak).max(*active);
        }

        let result = self.do_download(file_id, dest_path).await;
        if let Some((active, _)) = self.concurrency.lock().get_mut(&file_id) {
            *active -= 1;
        }
        result
    }

    async fn exists(&self, file_id: FileId) -> Result<bool, ArchiveClientError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self.contains(file_id))
    }

    async fn digest(&self, file_id: FileId) -> Result<Hash, ArchiveClientError> {
        self.delay().await;
        let bytes = self
            .file_bytes(file_id)
            .ok_or(ArchiveClientError::NotPresent { file_id })?;
        Ok(Sha256::digest(&bytes).into())
    }

    fn describe(&self) -> String {
        "in-memory archive".to_string()
    }
}
