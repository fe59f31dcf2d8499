use std::sync::Arc;

use block_storage::{BlockStore, BlockStoreApi, StorageError, StoreRole};
use tracing::info;

use crate::container::config::{IndexBackend, NodeConfig};

/// One open `BlockStore` per channel.
pub struct StoreContainer {
    stores: Vec<Arc<BlockStore>>,
}

impl StoreContainer {
    /// Open the store of every channel in `config`.
    pub fn open(config: &NodeConfig) -> Result<Self, StorageError> {
        let mut stores = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            let store = open_store(channel, config)?;
            let role = store.role();
            info!(
                channel = %channel,
                height = store.blockchain_info().height,
                is_archiver = role.is_archiver(),
                is_client = role == StoreRole::Client,
                archive = %store
                    .archive_client()
                    .map(|c| c.describe())
                    .unwrap_or_else(|| "none".to_string()),
                "[block-storage] block archiver initialized"
            );
            stores.push(Arc::new(store));
        }
        Ok(Self { stores })
    }

    pub fn stores(&self) -> &[Arc<BlockStore>] {
        &self.stores
    }

    /// Store of `channel`, if configured.
    pub fn store(&self, channel: &str) -> Option<&Arc<BlockStore>> {
        self.stores.iter().find(|s| s.channel() == channel)
    }
}

fn open_store(channel: &str, config: &NodeConfig) -> Result<BlockStore, StorageError> {
    match config.index_backend {
        IndexBackend::File => BlockStore::open_default(channel, config.store.clone()),
        #[cfg(feature = "rocksdb")]
        IndexBackend::RocksDb => {
            use crate::adapters::storage::{RocksDbConfig, RocksDbStore};
            use block_storage::BlockStoreDependencies;

            let kv_store = RocksDbStore::open(RocksDbConfig::new(config.store.index_dir(channel)))?;
            BlockStore::open(
                channel,
                config.store.clone(),
                BlockStoreDependencies {
                    kv_store: Box::new(kv_store),
                    archive: None,
                },
            )
        }
        #[cfg(not(feature = "rocksdb"))]
        IndexBackend::RocksDb => Err(StorageError::IoFailure {
            message: "index backend rocksdb requires the `rocksdb` feature".to_string(),
        }),
    }
}
