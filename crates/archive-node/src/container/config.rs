//! # Node Configuration
//!
//! Channels served by the node plus the store and telemetry configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LEDGER_CHANNELS` | `testchannel` |
//! | `LEDGER_INDEX_BACKEND` | `file` (`rocksdb` with the feature) |
//! | `LEDGER_METRICS_INTERVAL_SECS` | 15 |
//!
//! The remaining `LEDGER_*` keys belong to `StoreConfig` and `TelemetryConfig`.

use std::time::Duration;

use block_storage::{ConfigError, StoreConfig};
use ledger_telemetry::TelemetryConfig;
use thiserror::Error;

/// Default channel when `LEDGER_CHANNELS` is unset.
pub const DEFAULT_CHANNEL: &str = "testchannel";

/// Backend of the per-channel block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexBackend {
    /// Log of atomic batches under `<root>/index/<channel>`.
    #[default]
    File,
    /// RocksDB database under `<root>/index/<channel>`.
    RocksDb,
}

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Channels to open, in startup order.
    pub channels: Vec<String>,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
    pub index_backend: IndexBackend,
    /// Period of the metrics reporter.
    pub metrics_interval: Duration,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum NodeConfigError {
    #[error(transparent)]
    Store(#[from] ConfigError),

    #[error("LEDGER_CHANNELS names no channel")]
    NoChannels,

    #[error("invalid channel name {name:?}")]
    InvalidChannel { name: String },

    #[error("channel {name:?} listed twice")]
    DuplicateChannel { name: String },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("index backend rocksdb requires the `rocksdb` feature")]
    RocksDbUnavailable,
}

impl NodeConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, NodeConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NodeConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let channels = match lookup("LEDGER_CHANNELS") {
            Some(list) => parse_channels(&list)?,
            None => vec![DEFAULT_CHANNEL.to_string()],
        };

        let index_backend = match lookup("LEDGER_INDEX_BACKEND").as_deref() {
            None | Some("file") => IndexBackend::File,
            Some("rocksdb") if cfg!(feature = "rocksdb") => IndexBackend::RocksDb,
            Some("rocksdb") => return Err(NodeConfigError::RocksDbUnavailable),
            Some(other) => {
                return Err(NodeConfigError::InvalidValue {
                    key: "LEDGER_INDEX_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let metrics_interval = match lookup("LEDGER_METRICS_INTERVAL_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(NodeConfigError::InvalidValue {
                        key: "LEDGER_METRICS_INTERVAL_SECS",
                        value: raw,
                    })
                }
            },
            None => Duration::from_secs(15),
        };

        Ok(Self {
            channels,
            store: StoreConfig::from_lookup(&lookup)?,
            telemetry: TelemetryConfig::from_lookup(&lookup),
            index_backend,
            metrics_interval,
        })
    }

    /// Configuration for `channels` with default store settings rooted at `store`.
    pub fn new(channels: &[&str], store: StoreConfig) -> Self {
        Self {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            store,
            telemetry: TelemetryConfig::default(),
            index_backend: IndexBackend::File,
            metrics_interval: Duration::from_secs(15),
        }
    }
}

fn parse_channels(list: &str) -> Result<Vec<String>, NodeConfigError> {
    let mut channels: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !valid_channel_name(name) {
            return Err(NodeConfigError::InvalidChannel {
                name: name.to_string(),
            });
        }
        if channels.iter().any(|c| c == name) {
            return Err(NodeConfigError::DuplicateChannel {
                name: name.to_string(),
            });
        }
        channels.push(name.to_string());
    }
    if channels.is_empty() {
        return Err(NodeConfigError::NoChannels);
    }
    Ok(channels)
}

/// Channel names become directory names.
fn valid_channel_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
