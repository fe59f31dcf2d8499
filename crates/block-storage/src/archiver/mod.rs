//! # Archive Controller
//!
//! Offloads the oldest sealed block files of an archiver node to the block
//! archive repository, keeping at least `keep` sealed files local.
//!
//! ## Sweep
//!
//! 1. Observe the local sealed files (brief writer lock)
//! 2. Do nothing while at most `keep` are local
//! 3. Take the oldest `min(sealed - keep, each)` files
//! 4. Per file, in id order: digest, upload, confirm presence, mark archived
//!    and unlink. The first failure aborts the sweep so the archived ids
//!    stay a contiguous prefix of the sealed ids.
//!
//! Sweeps run on startup, on every timer tick and on every `FileSealed`
//! signal. No archive I/O happens under the writer lock.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use shared_types::Hash;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::blockfile::file_digest;
use crate::domain::config::TransferPolicy;
use crate::domain::errors::StorageError;
use crate::domain::retry::with_retry;
use crate::domain::value_objects::{FileId, StoreEvent};
use crate::ports::outbound::ArchiveClient;
use crate::service::BlockStore;

/// A file moved to the archive by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchivedFile {
    pub file_id: FileId,
    /// SHA-256 of the uploaded file.
    pub digest: Hash,
}

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Files archived, in id order.
    pub archived: Vec<ArchivedFile>,
    /// File whose transfer failed and ended the sweep early.
    pub aborted_at: Option<FileId>,
}

/// Offload task of an archiver node.
pub struct ArchiveController {
    store: Arc<BlockStore>,
    client: Arc<dyn ArchiveClient>,
    keep: usize,
    each: usize,
    interval: Duration,
    transfer: TransferPolicy,
}

impl ArchiveController {
    /// Controller for `store`, or `None` unless the store runs the archiver role.
    pub fn for_store(store: Arc<BlockStore>) -> Option<Self> {
        if !store.role().is_archiver() || store.is_read_only() {
            return None;
        }
        let client = store.archive_client()?;
        let config = store.config();
        let (keep, each, interval, transfer) = (
            config.archiver.keep,
            config.archiver.each,
            config.archiver.interval,
            config.transfer,
        );
        Some(Self {
            store,
            client,
            keep,
            each,
            interval,
            transfer,
        })
    }

    /// Run one sweep.
    ///
    /// Transfer failures end the sweep early and are reported in
    /// `aborted_at`. Index failures and cancellation are returned as errors.
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepReport, StorageError> {
        let mut report = SweepReport::default();
        let sealed = self.store.sealed_files()?;
        if sealed.len() <= self.keep {
            return Ok(report);
        }
        let count = (sealed.len() - self.keep).min(self.each);
        let candidates = &sealed[..count];

        tracing::debug!(
            channel = %self.store.channel(),
            sealed = sealed.len(),
            candidates = count,
            "[archiver] sweep started"
        );

        for &file_id in candidates {
            match self.archive_one(file_id, cancel).await {
                Ok(digest) => report.archived.push(ArchivedFile { file_id, digest }),
                Err(StorageError::Cancelled) => return Err(StorageError::Cancelled),
                Err(e @ StorageError::Index(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        channel = %self.store.channel(),
                        file_id,
                        error = %e,
                        "[archiver] sweep aborted; retrying on next trigger"
                    );
                    report.aborted_at = Some(file_id);
                    break;
                }
            }
        }
        Ok(report)
    }

    async fn archive_one(
        &self,
        file_id: FileId,
        cancel: &CancellationToken,
    ) -> Result<Hash, StorageError> {
        let path = self.store.file_path(file_id);

        let digest_path = path.clone();
        let digest = tokio::task::spawn_blocking(move || file_digest(&digest_path))
            .await
            .map_err(|e| StorageError::IoFailure {
                message: format!("digest task failed: {}", e),
            })??;

        let uploaded = with_retry(&self.transfer, cancel, "upload", file_id, || {
            self.client.upload(file_id, &path)
        })
        .await;
        if let Err(e) = uploaded {
            self.store.metrics_handle().record_upload_failure();
            return Err(e);
        }

        let present = with_retry(&self.transfer, cancel, "exists", file_id, || {
            self.client.exists(file_id)
        })
        .await?;
        if !present {
            self.store.metrics_handle().record_upload_failure();
            return Err(StorageError::NotPresent { file_id });
        }

        let archived = with_retry(&self.transfer, cancel, "digest", file_id, || {
            self.client.digest(file_id)
        })
        .await?;
        if archived != digest {
            self.store.metrics_handle().record_upload_failure();
            return Err(StorageError::Corruption {
                message: format!(
                    "archived copy of file {} has digest {}, local file has {}",
                    file_id,
                    hex::encode(archived),
                    hex::encode(digest)
                ),
            });
        }

        self.store.complete_archive(file_id)?;
        tracing::info!(
            channel = %self.store.channel(),
            file_id,
            digest = %hex::encode(digest),
            archive = %self.client.describe(),
            "[archiver] block file archived"
        );
        Ok(digest)
    }

    /// Sweep on startup, on each interval tick and on each sealed file until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut events = self.store.subscribe_events();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            channel = %self.store.channel(),
            keep = self.keep,
            each = self.each,
            archive = %self.client.describe(),
            "[archiver] controller started"
        );

        loop {
            // The first tick completes immediately: that is the startup sweep.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                event = events.recv() => match event {
                    Ok(StoreEvent::FileSealed(file_id)) => {
                        tracing::debug!(file_id, "[archiver] file sealed");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "[archiver] missed seal signals");
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            match self.sweep(&cancel).await {
                Ok(report) if !report.archived.is_empty() => tracing::info!(
                    channel = %self.store.channel(),
                    archived = report.archived.len(),
                    "[archiver] sweep finished"
                ),
                Ok(_) => {}
                Err(StorageError::Cancelled) => break,
                Err(e) => tracing::error!(
                    channel = %self.store.channel(),
                    error = %e,
                    "[archiver] sweep failed"
                ),
            }
        }

        tracing::info!(channel = %self.store.channel(), "[archiver] controller stopped");
    }
}
