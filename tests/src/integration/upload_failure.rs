//! # S6: Upload Failure
//!
//! A failed upload of file 0 aborts the sweep without marking anything
//! archived. The next sweep succeeds and the node converges to `keep`
//! local sealed files.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use block_storage::adapters::InMemoryArchiveClient;
    use block_storage::test_utils::{append_until_sealed, open_store_with, test_config};
    use block_storage::{ArchiveController, BlockStoreApi, FileState};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::integration::support::ArchiverNode;

    #[tokio::test]
    async fn test_failed_upload_then_convergence() {
        let node = ArchiverNode::new(600, 2, 5);
        let chain = append_until_sealed(&node.store, 6);
        // Every attempt for file 0 fails.
        node.archive.fail_next_uploads(3);

        let report = node.controller.sweep(&CancellationToken::new()).await.unwrap();
        assert!(report.archived.is_empty());
        assert_eq!(report.aborted_at, Some(0));
        assert!(node.archive.file_ids().is_empty());
        assert!(node
            .store
            .file_states()
            .unwrap()
            .iter()
            .all(|(_, state)| matches!(state, FileState::SealedLocal | FileState::Active)));
        assert_eq!(node.store.metrics().upload_failures, 1);

        let report = node.controller.sweep(&CancellationToken::new()).await.unwrap();
        let archived: Vec<_> = report.archived.iter().map(|a| a.file_id).collect();
        assert_eq!(archived, vec![0, 1, 2, 3]);
        assert_eq!(node.store.sealed_files().unwrap(), vec![4, 5]);
        assert_eq!(node.store.metrics().files_archived, 4);
        assert_eq!(node.store.retrieve_block_by_number(0).await.unwrap(), chain[0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_controller_retries_on_next_tick() {
        let dir = TempDir::new().unwrap();
        let archive = Arc::new(InMemoryArchiveClient::new());
        let mut config = test_config(dir.path(), 600).with_archiver(1, 5);
        config.archiver.interval = Duration::from_millis(50);
        let store = Arc::new(open_store_with(config, &archive).unwrap());
        let controller = ArchiveController::for_store(store.clone()).unwrap();

        append_until_sealed(&store, 3);
        archive.fail_next_uploads(3);

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run(cancel).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.sealed_files().unwrap().len() > 1 {
            assert!(tokio::time::Instant::now() < deadline, "controller never converged");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(archive.file_ids(), vec![0, 1]);
        assert_eq!(store.metrics().upload_failures, 1);
        assert_eq!(store.blockchain_info().height, store.metrics().blocks_committed);
    }
}
