//! # S4: Crash Mid-Archive
//!
//! The process dies after the index marked file 4 archived but before the
//! local copy was unlinked. Reopening the store finishes the archive step.

#[cfg(test)]
mod tests {
    use block_storage::test_utils::{append_all, append_until_sealed, extend_chain};
    use block_storage::{BlockStoreApi, FileState};
    use tokio_util::sync::CancellationToken;

    use crate::integration::support::ArchiverNode;

    const FILE_SIZE: u64 = 600;

    #[tokio::test]
    async fn test_restart_unlinks_file_marked_archived() {
        let node = ArchiverNode::new(FILE_SIZE, 2, 5);
        let chain = append_until_sealed(&node.store, 10);

        // Snapshot of file 4 as it was before the unlink.
        let file_4 = node.store.file_path(4);
        let leftover = std::fs::read(&file_4).unwrap();

        let report = node.controller.sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.archived.last().unwrap().file_id, 4);
        assert!(!file_4.exists());

        // Reproduce the on-disk state of the crash.
        let stopped = node.shutdown();
        std::fs::write(&file_4, &leftover).unwrap();
        let node = stopped.reopen(FILE_SIZE, 2, 5);

        assert!(!file_4.exists(), "local copy of an archived file survived restart");
        assert!(node.archive.contains(4));
        assert_eq!(node.store.file_states().unwrap()[4].1, FileState::ArchivedOnly);

        for block in &chain {
            let read = node.store.retrieve_block_by_number(block.number()).await.unwrap();
            assert_eq!(&read, block);
        }
        assert_eq!(node.archive.downloads_of(4), 1);
    }

    #[tokio::test]
    async fn test_restart_after_crash_before_index_update_reuploads() {
        let node = ArchiverNode::new(FILE_SIZE, 0, 1);
        append_until_sealed(&node.store, 2);

        // Upload landed, index update did not: the file is still sealed locally.
        node.archive
            .insert(0, std::fs::read(node.store.file_path(0)).unwrap());
        let node = node.restart(FILE_SIZE, 0, 1);
        assert_eq!(node.store.file_states().unwrap()[0], (0, FileState::SealedLocal));

        let report = node.controller.sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.archived.len(), 1);
        assert_eq!(node.store.file_states().unwrap()[0], (0, FileState::ArchivedOnly));
        assert!(!node.store.file_path(0).exists());
    }

    #[tokio::test]
    async fn test_appends_continue_after_restart() {
        let node = ArchiverNode::new(FILE_SIZE, 1, 5);
        let chain = append_until_sealed(&node.store, 4);
        node.controller.sweep(&CancellationToken::new()).await.unwrap();

        let node = node.restart(FILE_SIZE, 1, 5);
        let info = node.store.blockchain_info();
        assert_eq!(info.height, chain.len() as u64);
        assert_eq!(info.current_block_hash, chain.last().unwrap().header_hash());

        let more = extend_chain(&chain, 5, 64);
        append_all(&node.store, &more);
        assert_eq!(node.store.blockchain_info().height, (chain.len() + 5) as u64);
        assert_eq!(
            node.store.retrieve_block_by_number(0).await.unwrap(),
            chain[0]
        );
    }
}
