//! # Archive Metrics
//!
//! Per-store counters for the append, archive and fetch paths.
//! Exported to Prometheus by the telemetry crate from a `snapshot()`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by a store, its fetch coordinator and its controller.
#[derive(Debug, Default)]
pub struct ArchiveMetrics {
    pub blocks_committed: AtomicU64,
    pub files_sealed: AtomicU64,
    pub files_archived: AtomicU64,
    pub upload_failures: AtomicU64,
    pub downloads_started: AtomicU64,
    pub download_failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_evictions: AtomicU64,
}

/// Plain copy of `ArchiveMetrics` at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub blocks_committed: u64,
    pub files_sealed: u64,
    pub files_archived: u64,
    pub upload_failures: u64,
    pub downloads_started: u64,
    pub download_failures: u64,
    pub cache_hits: u64,
    pub cache_evictions: u64,
}

impl ArchiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block_committed(&self) {
        self.blocks_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_sealed(&self) {
        self.files_sealed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_archived(&self) {
        self.files_archived.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_failure(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_failure(&self) {
        self.download_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_eviction(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            blocks_committed: self.blocks_committed.load(Ordering::Relaxed),
            files_sealed: self.files_sealed.load(Ordering::Relaxed),
            files_archived: self.files_archived.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            downloads_started: self.downloads_started.load(Ordering::Relaxed),
            download_failures: self.download_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
        }
    }
}
