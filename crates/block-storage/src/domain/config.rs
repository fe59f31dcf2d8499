//! # Store Configuration
//!
//! Explicit configuration record passed to `BlockStore::open` and to the
//! archive components. Defaults follow the peer's ledger configuration.
//!
//! ## Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LEDGER_ROOT_DIR` | `./data/ledgersData` |
//! | `LEDGER_MAX_BLOCKFILE_SIZE` | 64 MiB |
//! | `LEDGER_ARCHIVER_ENABLED` | false |
//! | `LEDGER_ARCHIVER_EACH` | 30 |
//! | `LEDGER_ARCHIVER_KEEP` | 10 |
//! | `LEDGER_ARCHIVER_INTERVAL_SECS` | 60 |
//! | `LEDGER_ARCHIVING_ENABLED` | false |
//! | `LEDGER_BLOCK_ARCHIVER_URL` | `ledger-bank:222` |
//! | `LEDGER_BLOCK_ARCHIVER_DIR` | `/tmp` |
//! | `LEDGER_CACHE_DIR` | `<root>/archiveCache` |
//! | `LEDGER_CACHE_MAX_FILES` | 8 (at least 2) |
//! | `LEDGER_TRANSFER_ATTEMPTS` | 3 |
//! | `LEDGER_TRANSFER_BACKOFF_MS` | 200 |
//! | `LEDGER_TRANSFER_TIMEOUT_SECS` | 30 |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use super::value_objects::StoreRole;

/// Smallest fetch cache the coordinator will run with.
pub const MIN_CACHE_FILES: usize = 2;

/// Default block file size threshold (64 MiB).
pub const DEFAULT_MAX_BLOCKFILE_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration errors, naming the offending key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Offload parameters for archiver nodes.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Run the archive controller on this node.
    pub enabled: bool,
    /// Max files offloaded per sweep (E).
    pub each: usize,
    /// Minimum sealed files kept locally (K).
    pub keep: usize,
    /// Period of the sweep timer.
    pub interval: Duration,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            each: 30,
            keep: 10,
            interval: Duration::from_secs(60),
        }
    }
}

/// Location of the block archive repository.
#[derive(Debug, Clone)]
pub struct BlockArchiverConfig {
    /// Repository endpoint, used as a label in logs.
    pub url: String,
    /// Repository root directory.
    pub dir: PathBuf,
}

impl Default for BlockArchiverConfig {
    fn default() -> Self {
        Self {
            url: "ledger-bank:222".to_string(),
            dir: PathBuf::from("/tmp"),
        }
    }
}

/// Fetch cache parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache root; `None` means `<root>/archiveCache`.
    pub dir: Option<PathBuf>,
    /// Max cached files, never below `MIN_CACHE_FILES`.
    pub max_files: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_files: 8,
        }
    }
}

/// Retry budget for archive uploads and downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    /// Attempts per transfer, at least 1.
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
    /// Deadline for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for a block store and its archive components.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Every on-disk path is derived from this directory.
    pub root_dir: PathBuf,
    /// Size after which the active file is sealed.
    pub max_blockfile_size: u64,
    pub archiver: ArchiverConfig,
    /// Fetch archived files on miss (client role).
    pub archiving_enabled: bool,
    pub block_archiver: BlockArchiverConfig,
    pub cache: CacheConfig,
    pub transfer: TransferPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data/ledgersData"),
            max_blockfile_size: DEFAULT_MAX_BLOCKFILE_SIZE,
            archiver: ArchiverConfig::default(),
            archiving_enabled: false,
            block_archiver: BlockArchiverConfig::default(),
            cache: CacheConfig::default(),
            transfer: TransferPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("LEDGER_ROOT_DIR") {
            config.root_dir = PathBuf::from(dir);
        }
        if let Some(size) = parse_key::<u64, _>(&lookup, "LEDGER_MAX_BLOCKFILE_SIZE")? {
            if size == 0 {
                return Err(ConfigError::Invalid {
                    key: "LEDGER_MAX_BLOCKFILE_SIZE",
                    value: size.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            config.max_blockfile_size = size;
        }
        if let Some(enabled) = parse_bool(&lookup, "LEDGER_ARCHIVER_ENABLED")? {
            config.archiver.enabled = enabled;
        }
        if let Some(each) = parse_key::<usize, _>(&lookup, "LEDGER_ARCHIVER_EACH")? {
            config.archiver.each = each;
        }
        if let Some(keep) = parse_key::<usize, _>(&lookup, "LEDGER_ARCHIVER_KEEP")? {
            config.archiver.keep = keep;
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, "LEDGER_ARCHIVER_INTERVAL_SECS")? {
            config.archiver.interval = Duration::from_secs(secs.max(1));
        }
        if let Some(enabled) = parse_bool(&lookup, "LEDGER_ARCHIVING_ENABLED")? {
            config.archiving_enabled = enabled;
        }
        if let Some(url) = lookup("LEDGER_BLOCK_ARCHIVER_URL") {
            config.block_archiver.url = url;
        }
        if let Some(dir) = lookup("LEDGER_BLOCK_ARCHIVER_DIR") {
            config.block_archiver.dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("LEDGER_CACHE_DIR") {
            config.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(max) = parse_key::<usize, _>(&lookup, "LEDGER_CACHE_MAX_FILES")? {
            config.cache.max_files = max.max(MIN_CACHE_FILES);
        }
        if let Some(attempts) = parse_key::<u32, _>(&lookup, "LEDGER_TRANSFER_ATTEMPTS")? {
            config.transfer.attempts = attempts.max(1);
        }
        if let Some(ms) = parse_key::<u64, _>(&lookup, "LEDGER_TRANSFER_BACKOFF_MS")? {
            config.transfer.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, "LEDGER_TRANSFER_TIMEOUT_SECS")? {
            config.transfer.attempt_timeout = Duration::from_secs(secs.max(1));
        }

        Ok(config)
    }

    /// Archiving role derived from the two enable flags.
    pub fn role(&self) -> StoreRole {
        if self.archiver.enabled {
            StoreRole::Archiver
        } else if self.archiving_enabled {
            StoreRole::Client
        } else {
            StoreRole::Standalone
        }
    }

    /// `<root>/chains/<channel>`
    pub fn chain_dir(&self, channel: &str) -> PathBuf {
        self.root_dir.join("chains").join(channel)
    }

    /// `<root>/index/<channel>`
    pub fn index_dir(&self, channel: &str) -> PathBuf {
        self.root_dir.join("index").join(channel)
    }

    /// `<cache>/<channel>`
    pub fn cache_dir(&self, channel: &str) -> PathBuf {
        self.cache_root().join(channel)
    }

    /// `<archive>/<channel>`
    pub fn archive_dir(&self, channel: &str) -> PathBuf {
        self.block_archiver.dir.join(channel)
    }

    fn cache_root(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| self.root_dir.join("archiveCache"))
    }

    /// Cache capacity after clamping.
    pub fn cache_max_files(&self) -> usize {
        self.cache.max_files.max(MIN_CACHE_FILES)
    }

    /// Set the block file size threshold.
    pub fn with_max_blockfile_size(mut self, size: u64) -> Self {
        self.max_blockfile_size = size;
        self
    }

    /// Enable the archive controller with the given keep and each counts.
    pub fn with_archiver(mut self, keep: usize, each: usize) -> Self {
        self.archiver.enabled = true;
        self.archiver.keep = keep;
        self.archiver.each = each;
        self
    }

    /// Enable fetch-on-miss without running the controller.
    pub fn with_archiving(mut self, enabled: bool) -> Self {
        self.archiving_enabled = enabled;
        self
    }

    /// Set the archive repository root.
    pub fn with_archive_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.block_archiver.dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the fetch cache root and capacity.
    pub fn with_cache(mut self, dir: impl AsRef<Path>, max_files: usize) -> Self {
        self.cache.dir = Some(dir.as_ref().to_path_buf());
        self.cache.max_files = max_files.max(MIN_CACHE_FILES);
        self
    }

    /// Set the transfer retry budget.
    pub fn with_transfer(mut self, transfer: TransferPolicy) -> Self {
        self.transfer = transfer;
        self
    }
}

fn parse_key<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn parse_bool<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid {
                key,
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}
