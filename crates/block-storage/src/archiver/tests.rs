use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::adapters::InMemoryArchiveClient;
use crate::domain::config::StoreConfig;
use crate::domain::value_objects::{block_file_name, FileState};
use crate::ports::inbound::BlockStoreApi;
use crate::test_utils::*;

fn archiver_config(dir: &TempDir, keep: usize, each: usize) -> StoreConfig {
    test_config(dir.path(), 600).with_archiver(keep, each)
}

fn archiver_store(
    dir: &TempDir,
    keep: usize,
    each: usize,
) -> (Arc<BlockStore>, Arc<InMemoryArchiveClient>, ArchiveController) {
    let archive = Arc::new(InMemoryArchiveClient::new());
    let store = Arc::new(open_store_with(archiver_config(dir, keep, each), &archive).unwrap());
    let controller = ArchiveController::for_store(store.clone()).unwrap();
    (store, archive, controller)
}

#[test]
fn test_controller_requires_archiver_role() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(test_config(dir.path(), 600).with_archiving(true), None).unwrap());
    assert!(ArchiveController::for_store(store).is_none());
}

#[tokio::test]
async fn test_sweep_keeps_newest_files_local() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 2, 5);
    let chain = append_until_sealed(&store, 10);

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    let ids: Vec<FileId> = report.archived.iter().map(|a| a.file_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    assert_eq!(report.aborted_at, None);
    assert_eq!(archive.file_ids(), vec![0, 1, 2, 3, 4]);

    for id in 0..5 {
        assert!(!store.file_path(id).exists());
    }
    assert_eq!(store.sealed_files().unwrap(), vec![5, 6, 7, 8, 9]);

    // Second sweep brings local sealed files down to keep.
    controller.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(store.sealed_files().unwrap(), vec![8, 9]);

    // Archived blocks are still served through the fetch path.
    assert_eq!(store.retrieve_block_by_number(0).await.unwrap(), chain[0]);
}

#[tokio::test]
async fn test_sweep_digest_matches_uploaded_bytes() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 0, 1);
    append_until_sealed(&store, 1);
    let local = std::fs::read(store.file_path(0)).unwrap();

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.archived.len(), 1);
    assert_eq!(archive.file_bytes(0).unwrap(), local);

    use sha2::{Digest, Sha256};
    let expected: [u8; 32] = Sha256::digest(&local).into();
    assert_eq!(report.archived[0].digest, expected);
}

#[tokio::test]
async fn test_sweep_is_noop_within_keep() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 3, 5);
    append_until_sealed(&store, 3);

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert!(report.archived.is_empty());
    assert_eq!(archive.upload_calls(), 0);
}

#[tokio::test]
async fn test_upload_failure_aborts_and_next_sweep_converges() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 1, 5);
    append_until_sealed(&store, 4);
    // Exhausts every attempt for the first file.
    archive.fail_next_uploads(3);

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert!(report.archived.is_empty());
    assert_eq!(report.aborted_at, Some(0));
    assert_eq!(store.sealed_files().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(store.metrics().upload_failures, 1);
    assert_eq!(store.metrics().files_archived, 0);

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.archived.len(), 3);
    assert_eq!(store.sealed_files().unwrap(), vec![3]);
}

#[tokio::test]
async fn test_missing_after_upload_aborts() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 0, 5);
    append_until_sealed(&store, 2);
    archive.set_absent_after_upload(true);

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.aborted_at, Some(0));
    assert!(store.file_path(0).exists());
    assert_eq!(store.file_states().unwrap()[0], (0, FileState::SealedLocal));
}

#[tokio::test]
async fn test_damaged_archive_copy_aborts_and_is_repaired() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 0, 5);
    append_until_sealed(&store, 1);
    archive.set_corrupt_uploads(true);

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.aborted_at, Some(0));
    assert!(store.file_path(0).exists());
    assert_eq!(store.file_states().unwrap()[0], (0, FileState::SealedLocal));
    assert_eq!(store.metrics().upload_failures, 1);

    archive.set_corrupt_uploads(false);
    let local = std::fs::read(store.file_path(0)).unwrap();
    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.archived.len(), 1);
    assert_eq!(archive.file_bytes(0), Some(local));
    assert_eq!(store.file_states().unwrap()[0], (0, FileState::ArchivedOnly));
}

/// Filesystem archive whose first upload stalls past the attempt timeout and
/// keeps writing to its own temp file after the retry has landed.
struct StallingArchive {
    inner: crate::adapters::FsArchiveClient,
    dest: std::path::PathBuf,
    stalled: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl crate::ports::outbound::ArchiveClient for StallingArchive {
    async fn upload(
        &self,
        file_id: FileId,
        local_path: &std::path::Path,
    ) -> Result<(), crate::domain::errors::ArchiveClientError> {
        if !self.stalled.swap(true, std::sync::atomic::Ordering::SeqCst) {
            std::fs::create_dir_all(self.dest.parent().unwrap()).unwrap();
            let mut temp = crate::adapters::archive::temp_file_for(&self.dest).unwrap();
            std::io::Write::write_all(temp.as_file_mut(), b"first half").unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                std::io::Write::write_all(temp.as_file_mut(), b"late tail").unwrap();
            });
            std::future::pending::<()>().await;
        }
        self.inner.upload(file_id, local_path).await
    }

    async fn download(
        &self,
        file_id: FileId,
        dest_path: &std::path::Path,
    ) -> Result<(), crate::domain::errors::ArchiveClientError> {
        self.inner.download(file_id, dest_path).await
    }

    async fn exists(&self, file_id: FileId) -> Result<bool, crate::domain::errors::ArchiveClientError> {
        self.inner.exists(file_id).await
    }

    async fn digest(
        &self,
        file_id: FileId,
    ) -> Result<shared_types::Hash, crate::domain::errors::ArchiveClientError> {
        self.inner.digest(file_id).await
    }

    fn describe(&self) -> String {
        "stalling archive".to_string()
    }
}

#[tokio::test]
async fn test_stalled_upload_attempt_does_not_corrupt_retry() {
    let dir = TempDir::new().unwrap();
    let repo = dir.path().join("archive/testchannel");
    let archive = Arc::new(StallingArchive {
        inner: crate::adapters::FsArchiveClient::new(&repo, "mount"),
        dest: repo.join(block_file_name(0)),
        stalled: Default::default(),
    });
    let mut transfer = fast_transfer();
    transfer.attempt_timeout = Duration::from_millis(50);
    let config = archiver_config(&dir, 0, 5).with_transfer(transfer);
    let store = Arc::new(
        open_store(config, Some(archive.clone() as Arc<dyn crate::ports::outbound::ArchiveClient>))
            .unwrap(),
    );
    let controller = ArchiveController::for_store(store.clone()).unwrap();
    append_until_sealed(&store, 1);
    let local = std::fs::read(store.file_path(0)).unwrap();

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.archived.len(), 1);
    assert_eq!(store.file_states().unwrap()[0], (0, FileState::ArchivedOnly));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(std::fs::read(repo.join(block_file_name(0))).unwrap(), local);
}

#[tokio::test]
async fn test_reupload_of_present_file_is_harmless() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 0, 5);
    append_until_sealed(&store, 1);
    // Crash after a previous upload but before the index update.
    archive.insert(0, std::fs::read(store.file_path(0)).unwrap());

    let report = controller.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.archived.len(), 1);
    assert_eq!(store.file_states().unwrap()[0], (0, FileState::ArchivedOnly));
}

#[tokio::test]
async fn test_cancelled_sweep_returns_cancelled() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 0, 5);
    append_until_sealed(&store, 2);
    archive.set_latency(Some(Duration::from_millis(200)));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = controller.sweep(&cancel).await.unwrap_err();
    assert!(matches!(err, StorageError::Cancelled));
    assert_eq!(store.sealed_files().unwrap(), vec![0, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_sweeps_when_files_seal() {
    let dir = TempDir::new().unwrap();
    let (store, archive, controller) = archiver_store(&dir, 1, 10);
    let controller = Arc::new(controller);

    let cancel = CancellationToken::new();
    let task = {
        let controller = controller.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { controller.run(cancel).await })
    };

    // The controller archives concurrently, so count seals rather than local files.
    while store.metrics().files_sealed < 3 {
        let info = store.blockchain_info();
        store
            .add_block(&make_block(info.height, info.current_block_hash, 2, 64))
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while archive.file_ids().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "controller never archived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(archive.file_ids(), vec![0, 1]);
    assert_eq!(store.sealed_files().unwrap(), vec![2]);
}
