//! Prometheus metrics for the ledger archive node.
//!
//! All metrics follow the naming convention: `ledger_archive_<metric>` and
//! carry a `channel` label. Values are copied from each store's counters by
//! the node's metrics reporter, so they are exported as gauges.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // STORE METRICS
    // =========================================================================

    /// Current chain height per channel
    pub static ref CHAIN_HEIGHT: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_chain_height", "Number of committed blocks"),
        &["channel"]
    ).expect("metric creation failed");

    /// Blocks committed since the store was opened
    pub static ref BLOCKS_COMMITTED: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_blocks_committed", "Blocks committed since start"),
        &["channel"]
    ).expect("metric creation failed");

    /// Block files sealed since the store was opened
    pub static ref FILES_SEALED: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_files_sealed", "Block files sealed since start"),
        &["channel"]
    ).expect("metric creation failed");

    // =========================================================================
    // ARCHIVE METRICS
    // =========================================================================

    /// Block files moved to the archive
    pub static ref FILES_ARCHIVED: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_files_archived", "Block files archived since start"),
        &["channel"]
    ).expect("metric creation failed");

    /// Uploads that failed after every retry
    pub static ref UPLOAD_FAILURES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_upload_failures", "Uploads failed after retries"),
        &["channel"]
    ).expect("metric creation failed");

    // =========================================================================
    // FETCH METRICS
    // =========================================================================

    /// Downloads started by the fetch coordinator
    pub static ref DOWNLOADS_STARTED: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_downloads_started", "Archive downloads started"),
        &["channel"]
    ).expect("metric creation failed");

    /// Downloads that failed after every retry
    pub static ref DOWNLOAD_FAILURES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_download_failures", "Downloads failed after retries"),
        &["channel"]
    ).expect("metric creation failed");

    /// Reads served from the fetch cache
    pub static ref CACHE_HITS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_cache_hits", "Archived file reads served from cache"),
        &["channel"]
    ).expect("metric creation failed");

    /// Cached files deleted to stay within budget
    pub static ref CACHE_EVICTIONS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ledger_archive_cache_evictions", "Cached files evicted"),
        &["channel"]
    ).expect("metric creation failed");
}

/// One reading of a store, as exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSample {
    pub height: u64,
    pub blocks_committed: u64,
    pub files_sealed: u64,
    pub files_archived: u64,
    pub upload_failures: u64,
    pub downloads_started: u64,
    pub download_failures: u64,
    pub cache_hits: u64,
    pub cache_evictions: u64,
}

/// Register all metrics with the global registry. Safe to call twice.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Store
        Box::new(CHAIN_HEIGHT.clone()),
        Box::new(BLOCKS_COMMITTED.clone()),
        Box::new(FILES_SEALED.clone()),
        // Archive
        Box::new(FILES_ARCHIVED.clone()),
        Box::new(UPLOAD_FAILURES.clone()),
        // Fetch
        Box::new(DOWNLOADS_STARTED.clone()),
        Box::new(DOWNLOAD_FAILURES.clone()),
        Box::new(CACHE_HITS.clone()),
        Box::new(CACHE_EVICTIONS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Copy `sample` into the gauges of `channel`.
pub fn record_store_sample(channel: &str, sample: &StoreSample) {
    let set = |gauge: &IntGaugeVec, value: u64| {
        gauge
            .with_label_values(&[channel])
            .set(i64::try_from(value).unwrap_or(i64::MAX));
    };
    set(&CHAIN_HEIGHT, sample.height);
    set(&BLOCKS_COMMITTED, sample.blocks_committed);
    set(&FILES_SEALED, sample.files_sealed);
    set(&FILES_ARCHIVED, sample.files_archived);
    set(&UPLOAD_FAILURES, sample.upload_failures);
    set(&DOWNLOADS_STARTED, sample.downloads_started);
    set(&DOWNLOAD_FAILURES, sample.download_failures);
    set(&CACHE_HITS, sample.cache_hits);
    set(&CACHE_EVICTIONS, sample.cache_evictions);
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
