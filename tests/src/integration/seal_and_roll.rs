//! # S1: Seal and Roll
//!
//! With a 1024-byte threshold and blocks of about 150 bytes, the first file
//! takes the block that pushes it past the threshold and is then sealed.

#[cfg(test)]
mod tests {
    use block_storage::test_utils::{append_all, extend_chain, make_chain, open_store, test_config};
    use block_storage::{BlockStoreApi, FileState, StoreEvent};
    use tempfile::TempDir;

    const THRESHOLD: u64 = 1024;

    #[tokio::test]
    async fn test_ten_blocks_fill_two_files() {
        let dir = TempDir::new().unwrap();
        let store = open_store(test_config(dir.path(), THRESHOLD), None).unwrap();
        let mut events = store.subscribe_events();

        let chain = make_chain(10, 2);
        assert_eq!(chain[0].to_bytes().unwrap().len(), 150);
        append_all(&store, &chain);

        for number in 0..7 {
            assert_eq!(store.block_location(number).unwrap().file_id, 0, "block {number}");
        }
        for number in 7..10 {
            assert_eq!(store.block_location(number).unwrap().file_id, 1, "block {number}");
        }

        let first = std::fs::metadata(store.file_path(0)).unwrap().len();
        assert!(first > THRESHOLD && first <= THRESHOLD + 152, "file 0 is {first} bytes");
        assert!(std::fs::metadata(store.file_path(1)).unwrap().len() <= THRESHOLD);

        assert_eq!(
            store.file_states().unwrap(),
            vec![(0, FileState::SealedLocal), (1, FileState::Active)]
        );
        assert_eq!(events.try_recv().unwrap(), StoreEvent::FileSealed(0));
        assert!(events.try_recv().is_err());

        for block in &chain {
            assert_eq!(&store.retrieve_block_by_number(block.number()).await.unwrap(), block);
        }
    }

    #[tokio::test]
    async fn test_rollover_survives_restart() {
        let dir = TempDir::new().unwrap();
        let chain = make_chain(10, 2);
        {
            let store = open_store(test_config(dir.path(), THRESHOLD), None).unwrap();
            append_all(&store, &chain);
        }

        let store = open_store(test_config(dir.path(), THRESHOLD), None).unwrap();
        let info = store.blockchain_info();
        assert_eq!(info.height, 10);
        assert_eq!(info.current_block_hash, chain[9].header_hash());
        assert_eq!(store.block_location(7).unwrap().file_id, 1);

        // Appends continue in the active file.
        let more = extend_chain(&chain, 1, 2);
        append_all(&store, &more);
        assert_eq!(store.block_location(10).unwrap().file_id, 1);
    }
}
