//! # S2, S3: Archive and Fetch
//!
//! An archiver keeping 2 sealed files local offloads the oldest files in
//! batches of 5. Reads of an archived file download it once; concurrent
//! misses share that download.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use block_storage::test_utils::append_until_sealed;
    use block_storage::{BlockStoreApi, FileState};
    use futures::future::join_all;
    use tokio_util::sync::CancellationToken;

    use crate::integration::support::ArchiverNode;

    const FILE_SIZE: u64 = 600;

    #[tokio::test]
    async fn test_sweep_archives_oldest_five_and_fetches_once() {
        let node = ArchiverNode::new(FILE_SIZE, 2, 5);
        let chain = append_until_sealed(&node.store, 10);
        assert_eq!(node.store.sealed_files().unwrap(), (0..10).collect::<Vec<_>>());

        let report = node.controller.sweep(&CancellationToken::new()).await.unwrap();
        let archived: Vec<_> = report.archived.iter().map(|a| a.file_id).collect();
        assert_eq!(archived, vec![0, 1, 2, 3, 4]);
        assert_eq!(node.archive.file_ids(), vec![0, 1, 2, 3, 4]);
        for id in 0..5 {
            assert!(!node.store.file_path(id).exists(), "file {id} still local");
        }
        for id in 5..10 {
            assert!(node.store.file_path(id).exists());
        }

        let in_file_3 = node.blocks_in(3);
        assert!(!in_file_3.is_empty());
        let number = in_file_3[0];

        let block = node.store.retrieve_block_by_number(number).await.unwrap();
        assert_eq!(block, chain[number as usize]);
        assert_eq!(node.archive.downloads_of(3), 1);
        assert_eq!(node.store.file_states().unwrap()[3], (3, FileState::ArchivedCached));

        let again = node
            .store
            .retrieve_block_by_number(*in_file_3.last().unwrap())
            .await
            .unwrap();
        assert_eq!(again.number(), *in_file_3.last().unwrap());
        assert_eq!(node.archive.downloads_of(3), 1);
        assert_eq!(node.archive.download_calls(), 1);

        // Tx lookups resolve through the same path.
        let tx = block.tx_ids().next().unwrap().to_string();
        assert_eq!(node.store.retrieve_block_by_tx_id(&tx).await.unwrap(), block);
        assert_eq!(node.archive.downloads_of(3), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifty_concurrent_misses_share_one_download() {
        let node = ArchiverNode::new(FILE_SIZE, 2, 5);
        append_until_sealed(&node.store, 10);
        node.controller.sweep(&CancellationToken::new()).await.unwrap();
        assert!(node.archive.contains(3));
        assert_eq!(node.archive.download_calls(), 0);

        // Keep the download in flight long enough for every reader to miss.
        node.archive.set_latency(Some(Duration::from_millis(100)));
        let in_file_3 = node.blocks_in(3);

        let store = Arc::clone(&node.store);
        let reads = (0..50).map(|i| {
            let store = Arc::clone(&store);
            let number = in_file_3[i % in_file_3.len()];
            tokio::spawn(async move { store.retrieve_block_by_number(number).await })
        });
        let results = join_all(reads).await;

        let mut ok = 0;
        for result in results {
            let block = result.unwrap().unwrap();
            assert!(in_file_3.contains(&block.number()));
            ok += 1;
        }
        assert_eq!(ok, 50);
        assert_eq!(node.archive.downloads_of(3), 1);
        assert_eq!(node.archive.peak_concurrent_downloads(3), 1);
        assert_eq!(node.store.metrics().downloads_started, 1);
    }

    #[tokio::test]
    async fn test_reads_across_archived_and_local_files_in_order() {
        let node = ArchiverNode::new(FILE_SIZE, 2, 5);
        let chain = append_until_sealed(&node.store, 10);
        node.controller.sweep(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut blocks = node.store.retrieve_blocks(0, cancel.clone());
        for expected in &chain {
            assert_eq!(&blocks.next().await.unwrap(), expected);
        }
        drop(blocks);

        // Five archived files were walked with a cache of two.
        for id in 0..5 {
            assert_eq!(node.archive.downloads_of(id), 1);
        }
        let cached = node.store.fetcher().unwrap().cached_files();
        assert!(cached.len() <= 2, "{cached:?}");
    }
}
