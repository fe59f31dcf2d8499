//! Startup reconciliation of the index against the block files on disk.
//!
//! 1. Finish interrupted archive transitions (archived file still local)
//! 2. Require every sealed file to be present
//! 3. Re-index complete records appended after the checkpoint, sealing
//!    again when they crossed the threshold and moving on to the next file
//! 4. Refuse block files past the active one
//! 5. Truncate the torn tail of the active file
//!
//! `inspect` performs the same checks without changing anything on disk.

use std::path::Path;

use shared_types::Block;

use crate::domain::blockfile::{record_size, BlockFileScanner, BlockFileWriter};
use crate::domain::errors::{short_hash, StorageError};
use crate::domain::index::{BlockIndex, IndexBatch};
use crate::domain::value_objects::{
    block_file_name, parse_block_file_name, Checkpoint, FileEntry, FileId, FileStatus,
};

/// Writer positioned at the end of the indexed data, and the checkpoint it matches.
pub(super) struct Recovered {
    /// `None` for a read-only open.
    pub writer: Option<BlockFileWriter>,
    pub checkpoint: Checkpoint,
    pub reindexed: u64,
}

pub(super) fn recover(
    index: &BlockIndex,
    chain_dir: &Path,
    max_blockfile_size: u64,
) -> Result<Recovered, StorageError> {
    reconcile_file_statuses(index, chain_dir)?;

    let mut cp = index.checkpoint()?;
    let mut reindexed = 0;

    loop {
        let Some(on_disk) = active_file_len(chain_dir, &cp)? else {
            break;
        };
        if on_disk == cp.active_file_size {
            break;
        }
        let file_id = cp.active_file_id;
        reindexed += reindex_tail(index, chain_dir, &mut cp, max_blockfile_size)?;
        if cp.active_file_id == file_id {
            break;
        }
        // Sealed while re-indexing: the chain continues in the next file.
    }
    reject_files_past(chain_dir, cp.active_file_id)?;

    let writer = BlockFileWriter::open(
        &chain_dir.join(block_file_name(cp.active_file_id)),
        cp.active_file_size,
    )?;

    if reindexed > 0 {
        tracing::warn!(
            reindexed,
            height = cp.height(),
            "[block-storage] re-indexed blocks appended after the last checkpoint"
        );
    }

    Ok(Recovered {
        writer: Some(writer),
        checkpoint: cp,
        reindexed,
    })
}

/// Check the index against the files without repairing either.
///
/// Bytes past the checkpoint in the active file are reported and left alone;
/// every other disagreement is `Corruption`.
pub(super) fn inspect(index: &BlockIndex, chain_dir: &Path) -> Result<Recovered, StorageError> {
    for (file_id, status) in index.file_statuses()? {
        if status == FileStatus::Sealed && !chain_dir.join(block_file_name(file_id)).exists() {
            return Err(missing_sealed_file(file_id, chain_dir));
        }
    }

    let cp = index.checkpoint()?;
    if let Some(on_disk) = active_file_len(chain_dir, &cp)? {
        if on_disk > cp.active_file_size {
            tracing::warn!(
                file_id = cp.active_file_id,
                unindexed_bytes = on_disk - cp.active_file_size,
                "[block-storage] active file holds data past the last checkpoint"
            );
        }
    }
    reject_files_past(chain_dir, cp.active_file_id)?;

    Ok(Recovered {
        writer: None,
        checkpoint: cp,
        reindexed: 0,
    })
}

/// Size of the active file, or `None` when it does not exist yet.
fn active_file_len(chain_dir: &Path, cp: &Checkpoint) -> Result<Option<u64>, StorageError> {
    let path = chain_dir.join(block_file_name(cp.active_file_id));
    if !path.exists() {
        if cp.active_file_size > 0 {
            return Err(StorageError::corruption(format!(
                "index ahead of data: active file {} is missing",
                path.display()
            )));
        }
        return Ok(None);
    }

    let on_disk = std::fs::metadata(&path)?.len();
    if on_disk < cp.active_file_size {
        return Err(StorageError::corruption(format!(
            "index ahead of data: {} holds {} bytes, checkpoint records {}",
            path.display(),
            on_disk,
            cp.active_file_size
        )));
    }
    Ok(Some(on_disk))
}

/// A block file newer than the active one means the index lost committed data.
fn reject_files_past(chain_dir: &Path, active: FileId) -> Result<(), StorageError> {
    for dirent in std::fs::read_dir(chain_dir)? {
        let name = dirent?.file_name();
        let Some(file_id) = name.to_str().and_then(parse_block_file_name) else {
            continue;
        };
        if file_id > active {
            return Err(StorageError::corruption(format!(
                "index behind data: block file {} exists past active file {} in {}",
                file_id,
                active,
                chain_dir.display()
            )));
        }
    }
    Ok(())
}

fn missing_sealed_file(file_id: FileId, chain_dir: &Path) -> StorageError {
    StorageError::corruption(format!(
        "sealed file {} is missing from {}",
        file_id,
        chain_dir.display()
    ))
}

fn reconcile_file_statuses(index: &BlockIndex, chain_dir: &Path) -> Result<(), StorageError> {
    for (file_id, status) in index.file_statuses()? {
        let path = chain_dir.join(block_file_name(file_id));
        match status {
            FileStatus::Archived if path.exists() => {
                tracing::info!(
                    file_id,
                    "[block-storage] completing interrupted archive: removing local copy"
                );
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(file_id, error = %e, "[block-storage] failed to remove archived file");
                }
            }
            FileStatus::Sealed if !path.exists() => {
                return Err(missing_sealed_file(file_id, chain_dir));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Index the complete records past the checkpoint. Returns how many.
fn reindex_tail(
    index: &BlockIndex,
    chain_dir: &Path,
    cp: &mut Checkpoint,
    max_blockfile_size: u64,
) -> Result<u64, StorageError> {
    let file_id: FileId = cp.active_file_id;
    let path = chain_dir.join(block_file_name(file_id));
    let mut scanner = BlockFileScanner::open(&path, cp.active_file_size)?;
    let mut count = 0;
    let mut sealed_len = None;

    for (offset, bytes) in scanner.by_ref() {
        if cp.active_file_id != file_id {
            return Err(StorageError::corruption(format!(
                "records follow the sealing block in file {}",
                file_id
            )));
        }

        let block = match Block::from_bytes(&bytes) {
            Ok(block) => block,
            Err(e) => {
                // Never acknowledged: the index commit did not happen.
                tracing::warn!(file_id, offset, error = %e, "[block-storage] undecodable tail record");
                break;
            }
        };

        let expected = cp.height();
        if block.number() != expected {
            return Err(StorageError::corruption(format!(
                "recovered block in file {} at offset {} has number {}, expected {}",
                file_id,
                offset,
                block.number(),
                expected
            )));
        }
        if expected > 0 && block.previous_hash() != cp.last_block_hash {
            return Err(StorageError::corruption(format!(
                "recovered block {} does not link: previous hash {}, expected {}",
                expected,
                short_hash(&block.previous_hash()),
                short_hash(&cp.last_block_hash)
            )));
        }

        let entry = FileEntry {
            file_id,
            offset,
            length: bytes.len() as u64,
        };
        let mut batch = IndexBatch::new();
        batch.put_block(block.number(), entry);
        for tx_id in block.tx_ids() {
            if !index.has_tx(tx_id)? {
                batch.put_tx(tx_id, entry);
            }
        }

        cp.previous_block_hash = cp.last_block_hash;
        cp.last_block_hash = block.header_hash();
        cp.last_block_number = Some(block.number());
        cp.active_file_size = offset + record_size(entry.length);

        if cp.active_file_size > max_blockfile_size {
            sealed_len = Some(cp.active_file_size);
            batch.set_status(file_id, FileStatus::Sealed);
            cp.active_file_id = file_id + 1;
            cp.active_file_size = 0;
        }
        batch.set_checkpoint(cp)?;
        index.commit(batch)?;
        count += 1;
    }

    if scanner.stopped_on_torn_record() {
        tracing::warn!(
            file_id,
            valid_bytes = scanner.offset(),
            "[block-storage] torn record at the end of the active file"
        );
    }
    if let Some(sealed_len) = sealed_len {
        // Sealed during recovery: cut anything after the sealing block.
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        if file.metadata()?.len() > sealed_len {
            file.set_len(sealed_len)?;
            file.sync_data()?;
        }
    }
    Ok(count)
}
