//! # Node Runtime
//!
//! Owns the store container and the background tasks of the node.
//!
//! ## Tasks
//!
//! - One `ArchiveController` per store on archiver nodes
//! - One metrics reporter copying every store's counters into Prometheus
//!
//! ## Shutdown Sequence
//!
//! 1. Cancel the shared token
//! 2. Wait for every task, up to a grace period
//! 3. Drop the stores, releasing the channel locks

use std::sync::Arc;
use std::time::Duration;

use block_storage::{ArchiveController, BlockStore, BlockStoreApi, MetricsSnapshot, StorageError};
use ledger_telemetry::{record_store_sample, StoreSample};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::container::{NodeConfig, StoreContainer};

/// Grace period for tasks after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct NodeRuntime {
    config: NodeConfig,
    container: StoreContainer,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeRuntime {
    /// Open the stores of every configured channel.
    pub fn open(config: NodeConfig) -> Result<Self, StorageError> {
        let container = StoreContainer::open(&config)?;
        Ok(Self {
            config,
            container,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background tasks. Must run inside a tokio runtime.
    ///
    /// Returns the number of archive controllers started.
    pub fn start(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let mut controllers = 0;

        for store in self.container.stores() {
            let Some(controller) = ArchiveController::for_store(Arc::clone(store)) else {
                continue;
            };
            let cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move { controller.run(cancel).await }));
            controllers += 1;
        }

        let stores: Vec<Arc<BlockStore>> = self.container.stores().to_vec();
        let interval = self.config.metrics_interval;
        let cancel = self.cancel.child_token();
        tasks.push(tokio::spawn(run_metrics_reporter(stores, interval, cancel)));

        info!(
            channels = self.container.stores().len(),
            controllers,
            "[archive-node] runtime started"
        );
        controllers
    }

    pub fn stores(&self) -> &[Arc<BlockStore>] {
        self.container.stores()
    }

    pub fn store(&self, channel: &str) -> Option<&Arc<BlockStore>> {
        self.container.store(channel)
    }

    /// Token cancelled by `shutdown`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("[archive-node] initiating graceful shutdown");
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "[archive-node] task ended abnormally"),
                Err(_) => warn!("[archive-node] task did not stop within the grace period"),
            }
        }

        // Final reading so the exported gauges match the stores on exit.
        report_metrics(self.container.stores());
        info!("[archive-node] shutdown complete");
    }
}

async fn run_metrics_reporter(
    stores: Vec<Arc<BlockStore>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => report_metrics(&stores),
        }
    }
}

/// Copy the counters of every store into the Prometheus gauges.
pub fn report_metrics(stores: &[Arc<BlockStore>]) {
    for store in stores {
        let sample = store_sample(store.blockchain_info().height, store.metrics());
        record_store_sample(store.channel(), &sample);
    }
}

/// Exported view of one store.
pub fn store_sample(height: u64, snapshot: MetricsSnapshot) -> StoreSample {
    StoreSample {
        height,
        blocks_committed: snapshot.blocks_committed,
        files_sealed: snapshot.files_sealed,
        files_archived: snapshot.files_archived,
        upload_failures: snapshot.upload_failures,
        downloads_started: snapshot.downloads_started,
        download_failures: snapshot.download_failures,
        cache_hits: snapshot.cache_hits,
        cache_evictions: snapshot.cache_evictions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_storage::test_utils::{append_all, append_until_sealed, make_chain, test_config};
    use block_storage::FileState;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_standalone_node_runs_no_controller() {
        let dir = TempDir::new().unwrap();
        let runtime =
            NodeRuntime::open(NodeConfig::new(&["standalone-ch"], test_config(dir.path(), 600)))
                .unwrap();
        assert_eq!(runtime.start(), 0);
        runtime.shutdown().await;
        assert!(runtime.cancellation_token().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_archiver_node_offloads_sealed_files() {
        let dir = TempDir::new().unwrap();
        let store_config = test_config(dir.path(), 600).with_archiver(1, 10);
        let runtime = NodeRuntime::open(NodeConfig::new(&["archiver-ch"], store_config)).unwrap();
        let store = Arc::clone(runtime.store("archiver-ch").unwrap());

        // Sealed before start: the startup sweep picks them up.
        append_until_sealed(&store, 3);
        assert_eq!(runtime.start(), 1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.metrics().files_archived < 2 {
            assert!(tokio::time::Instant::now() < deadline, "nothing archived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        runtime.shutdown().await;

        let states = store.file_states().unwrap();
        assert_eq!(states[0], (0, FileState::ArchivedOnly));
        assert_eq!(states[1], (1, FileState::ArchivedOnly));
        assert_eq!(states[2], (2, FileState::SealedLocal));
        assert!(dir.path().join("archive").join("archiver-ch").is_dir());
    }

    #[tokio::test]
    async fn test_shutdown_publishes_final_metrics() {
        let dir = TempDir::new().unwrap();
        let runtime =
            NodeRuntime::open(NodeConfig::new(&["metrics-ch"], test_config(dir.path(), 1 << 20)))
                .unwrap();
        runtime.start();
        append_all(runtime.store("metrics-ch").unwrap(), &make_chain(4, 8));
        runtime.shutdown().await;

        let height = ledger_telemetry::CHAIN_HEIGHT
            .with_label_values(&["metrics-ch"])
            .get();
        let committed = ledger_telemetry::BLOCKS_COMMITTED
            .with_label_values(&["metrics-ch"])
            .get();
        assert_eq!((height, committed), (4, 4));
    }

    #[test]
    fn test_store_sample_copies_every_counter() {
        let snapshot = MetricsSnapshot {
            blocks_committed: 1,
            files_sealed: 2,
            files_archived: 3,
            upload_failures: 4,
            downloads_started: 5,
            download_failures: 6,
            cache_hits: 7,
            cache_evictions: 8,
        };
        let sample = store_sample(9, snapshot);
        assert_eq!(
            sample,
            StoreSample {
                height: 9,
                blocks_committed: 1,
                files_sealed: 2,
                files_archived: 3,
                upload_failures: 4,
                downloads_started: 5,
                download_failures: 6,
                cache_hits: 7,
                cache_evictions: 8,
            }
        );
    }
}
