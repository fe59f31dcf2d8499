//! # S5: Chain-Break Detection
//!
//! A flipped byte in the previous hash of block 42 stops the verifier at
//! block 42 with both hashes in the report.

#[cfg(test)]
mod tests {
    use block_storage::test_utils::{
        append_all, corrupt_previous_hash, make_chain, make_signed_chain, open_store,
        signing_key, test_config, TEST_MSP,
    };
    use block_storage::{ChainVerifier, SignaturePolicy, VerificationFailure};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::integration::support::ArchiverNode;

    #[tokio::test]
    async fn test_corrupted_block_42_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = open_store(test_config(dir.path(), 2048), None).unwrap();
        let chain = make_chain(60, 16);
        append_all(&store, &chain);
        assert!(store.sealed_files().unwrap().len() > 1);

        let observed = corrupt_previous_hash(&store, 42).unwrap();

        match ChainVerifier::new(&store).verify().await {
            Err(VerificationFailure::ChainBreak {
                number,
                expected,
                observed: recorded,
            }) => {
                assert_eq!(number, 42);
                assert_eq!(expected, chain[41].header_hash());
                assert_eq!(recorded, observed);
                assert_ne!(recorded, expected);
            }
            other => panic!("expected a chain break at 42, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signed_chain_verifies_through_archive() {
        let node = ArchiverNode::new(600, 1, 10);
        let signer = signing_key(7);
        let chain = make_signed_chain(20, &signer);
        append_all(&node.store, &chain);
        node.controller.sweep(&CancellationToken::new()).await.unwrap();
        assert!(!node.archive.file_ids().is_empty());

        let policy = SignaturePolicy::new(TEST_MSP, [signer.verifying_key().to_bytes()]);
        let report = ChainVerifier::new(node.store.as_ref())
            .with_policy(policy)
            .verify()
            .await
            .unwrap();
        assert_eq!(report.verified, 20);
        assert_eq!(report.last_hash, Some(chain[19].header_hash()));
    }
}
