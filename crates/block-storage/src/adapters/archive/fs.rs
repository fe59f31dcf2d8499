//! Mount-style archive transport.
//!
//! The repository is a directory `<archiveDir>/<channel>/` on a shared
//! filesystem holding `blockfile_NNNNNN` blobs.
//!
//! Every transfer streams into its own temp file beside the destination,
//! fsyncs it and renames it into place on a blocking thread. An attempt
//! abandoned by a timeout finishes or fails on its own file and never mixes
//! bytes with its retry.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shared_types::Hash;
use tempfile::NamedTempFile;
use tokio::fs;

use crate::domain::blockfile::file_digest;
use crate::domain::errors::ArchiveClientError;
use crate::domain::value_objects::{block_file_name, FileId};
use crate::ports::outbound::ArchiveClient;

const TEMP_SUFFIX: &str = ".tmp";

/// Whether `name` is a transfer left unfinished beside its destination.
pub fn is_temp_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

/// Fresh temp file `<dest name>.XXXXXX.tmp` in the directory of `dest`.
pub(crate) fn temp_file_for(dest: &Path) -> io::Result<NamedTempFile> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut prefix = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    prefix.push(".");
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
}

/// Copy `src` to `dest` through a unique temp file, fsyncing before the rename.
fn copy_atomic_blocking(src: &Path, dest: &Path) -> io::Result<()> {
    let mut source = File::open(src)?;
    let mut temp = temp_file_for(dest)?;
    io::copy(&mut source, temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    temp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

async fn copy_atomic(src: &Path, dest: &Path) -> Result<(), ArchiveClientError> {
    let (src, dest) = (src.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || copy_atomic_blocking(&src, &dest))
        .await
        .map_err(|e| ArchiveClientError::Io {
            message: format!("copy task failed: {}", e),
        })??;
    Ok(())
}

async fn digest_of(path: &Path) -> io::Result<Hash> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || file_digest(&path))
        .await
        .map_err(io::Error::other)?
}

/// Archive client over a mounted directory.
pub struct FsArchiveClient {
    root: PathBuf,
    url: String,
}

impl FsArchiveClient {
    /// Client for the repository directory `root` (already channel-scoped).
    pub fn new(root: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url: url.into(),
        }
    }

    fn blob_path(&self, file_id: FileId) -> PathBuf {
        self.root.join(block_file_name(file_id))
    }
}

#[async_trait]
impl ArchiveClient for FsArchiveClient {
    async fn upload(&self, file_id: FileId, local_path: &Path) -> Result<(), ArchiveClientError> {
        let dest = self.blob_path(file_id);
        if fs::try_exists(&dest).await? {
            if digest_of(&dest).await? == digest_of(local_path).await? {
                tracing::debug!(file_id, "[archiver] already in archive, skipping upload");
                return Ok(());
            }
            tracing::warn!(file_id, "[archiver] archived copy differs from local file, replacing it");
        }
        fs::create_dir_all(&self.root).await?;
        copy_atomic(local_path, &dest).await
    }

    async fn download(&self, file_id: FileId, dest_path: &Path) -> Result<(), ArchiveClientError> {
        let src = self.blob_path(file_id);
        if !fs::try_exists(&src).await? {
            return Err(ArchiveClientError::NotPresent { file_id });
        }
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        copy_atomic(&src, dest_path).await
    }

    async fn exists(&self, file_id: FileId) -> Result<bool, ArchiveClientError> {
        Ok(fs::try_exists(self.blob_path(file_id)).await?)
    }

    async fn digest(&self, file_id: FileId) -> Result<Hash, ArchiveClientError> {
        match digest_of(&self.blob_path(file_id)).await {
            Ok(digest) => Ok(digest),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ArchiveClientError::NotPresent { file_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.url, self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let local = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let src = local.path().join("blockfile_000003");
        std::fs::write(&src, b"block bytes").unwrap();

        let client = FsArchiveClient::new(archive.path().join("ch1"), "ledger-bank:222");
        client.upload(3, &src).await.unwrap();
        assert!(client.exists(3).await.unwrap());
        assert!(archive.path().join("ch1/blockfile_000003").exists());

        let dest = local.path().join("cache/blockfile_000003");
        client.download(3, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"block bytes");
        assert_eq!(std::fs::read_dir(local.path().join("cache")).unwrap().count(), 1);
        assert_eq!(
            client.digest(3).await.unwrap(),
            file_digest(&src).unwrap()
        );
    }

    #[tokio::test]
    async fn test_upload_is_idempotent() {
        let local = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let src = local.path().join("blockfile_000000");
        std::fs::write(&src, b"v1").unwrap();

        let client = FsArchiveClient::new(archive.path(), "bank");
        client.upload(0, &src).await.unwrap();
        client.upload(0, &src).await.unwrap();

        assert_eq!(
            std::fs::read(archive.path().join("blockfile_000000")).unwrap(),
            b"v1"
        );
    }

    #[tokio::test]
    async fn test_download_missing_is_not_present() {
        let archive = TempDir::new().unwrap();
        let client = FsArchiveClient::new(archive.path(), "bank");

        let result = client
            .download(7, &archive.path().join("out/blockfile_000007"))
            .await;
        assert!(matches!(
            result,
            Err(ArchiveClientError::NotPresent { file_id: 7 })
        ));
        assert!(!client.exists(7).await.unwrap());
        assert!(matches!(
            client.digest(7).await,
            Err(ArchiveClientError::NotPresent { file_id: 7 })
        ));
    }

    #[tokio::test]
    async fn test_upload_replaces_damaged_copy() {
        let local = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let src = local.path().join("blockfile_000002");
        std::fs::write(&src, b"complete block file").unwrap();
        std::fs::write(archive.path().join("blockfile_000002"), b"compl").unwrap();

        let client = FsArchiveClient::new(archive.path(), "bank");
        client.upload(2, &src).await.unwrap();
        assert_eq!(
            std::fs::read(archive.path().join("blockfile_000002")).unwrap(),
            b"complete block file"
        );
    }

    #[test]
    fn test_abandoned_attempt_does_not_touch_retry() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("blockfile_000001");
        let src = dir.path().join("source");
        std::fs::write(&src, vec![7u8; 4096]).unwrap();

        // An earlier attempt still holding its temp file open.
        let mut stale = temp_file_for(&dest).unwrap();
        copy_atomic_blocking(&src, &dest).unwrap();
        std::io::Write::write_all(stale.as_file_mut(), b"late bytes").unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 4096]);
        assert_ne!(stale.path(), dest.as_path());
        let name = stale.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("blockfile_000001.") && is_temp_name(&name));
    }
}
