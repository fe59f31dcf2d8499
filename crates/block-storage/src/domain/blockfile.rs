//! # Block Files
//!
//! On-disk segments holding a sequence of `<unsigned varint N><N block bytes>`
//! records.
//!
//! - `BlockFileWriter`: the single handle appending to the active file
//! - `BlockFileReader`: random access by `(offset, length)` from the index
//! - `BlockFileScanner`: sequential recovery scan that stops at the first
//!   record it cannot read

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use shared_types::Hash;
use unsigned_varint::{encode, io::ReadError};

use super::errors::StorageError;

/// Encode the length prefix for a record of `len` bytes.
fn length_prefix(len: u64, buf: &mut [u8; 10]) -> &[u8] {
    encode::u64(len, buf)
}

/// Bytes a whole record occupies on disk.
pub fn record_size(block_len: u64) -> u64 {
    let mut buf = encode::u64_buffer();
    length_prefix(block_len, &mut buf).len() as u64 + block_len
}

// =============================================================================
// WRITER
// =============================================================================

/// Append handle on the active file.
pub struct BlockFileWriter {
    file: File,
    path: PathBuf,
    size: u64,
}

impl BlockFileWriter {
    /// Open (or create) `path` for appending at `size`.
    ///
    /// Bytes past `size` are a torn write and are truncated. A file shorter
    /// than `size` means indexed data is missing.
    pub fn open(path: &Path, size: u64) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        let on_disk = file.metadata()?.len();

        if on_disk < size {
            return Err(StorageError::corruption(format!(
                "{} is {} bytes, index expects {}",
                path.display(),
                on_disk,
                size
            )));
        }
        if on_disk > size {
            tracing::warn!(
                path = %path.display(),
                on_disk,
                size,
                "[block-storage] truncating torn tail"
            );
            file.set_len(size)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::Start(size))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Append one record and fsync. Returns the record's starting offset.
    ///
    /// On failure the file is cut back to its previous size.
    pub fn append(&mut self, block_bytes: &[u8]) -> Result<u64, StorageError> {
        let offset = self.size;
        let mut buf = encode::u64_buffer();
        let prefix = length_prefix(block_bytes.len() as u64, &mut buf);

        let written = self
            .file
            .write_all(prefix)
            .and_then(|_| self.file.write_all(block_bytes))
            .and_then(|_| self.file.sync_data());

        if let Err(e) = written {
            let _ = self.truncate(offset);
            return Err(e.into());
        }

        self.size = offset + prefix.len() as u64 + block_bytes.len() as u64;
        Ok(offset)
    }

    /// Cut the file back to `size` (undo of an append whose index commit failed).
    pub fn truncate(&mut self, size: u64) -> Result<(), StorageError> {
        self.file.set_len(size)?;
        self.file.seek(SeekFrom::Start(size))?;
        self.file.sync_data()?;
        self.size = size;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// READER
// =============================================================================

/// Read-only handle on a sealed, cached or active file.
pub struct BlockFileReader {
    file: File,
    path: PathBuf,
}

impl BlockFileReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    /// Read the block bytes of the record at `offset`.
    ///
    /// Fails with `Corruption` if the length prefix disagrees with `length`
    /// or the record is cut short.
    pub fn read_at(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&self.file);

        let recorded = match unsigned_varint::io::read_u64(&mut reader) {
            Ok(n) => n,
            Err(ReadError::Io(e)) if e.kind() != io::ErrorKind::UnexpectedEof => {
                return Err(e.into())
            }
            Err(e) => {
                return Err(StorageError::corruption(format!(
                    "{}@{}: unreadable length prefix: {}",
                    self.path.display(),
                    offset,
                    e
                )))
            }
        };
        if recorded != length {
            return Err(StorageError::corruption(format!(
                "{}@{}: length prefix {} disagrees with index length {}",
                self.path.display(),
                offset,
                recorded,
                length
            )));
        }

        let mut bytes = vec![0u8; length as usize];
        reader.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                StorageError::corruption(format!(
                    "{}@{}: record truncated",
                    self.path.display(),
                    offset
                ))
            } else {
                e.into()
            }
        })?;
        Ok(bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// SCANNER
// =============================================================================

/// Sequential scan over the records of a file.
///
/// Yields `(offset, block_bytes)` and stops at EOF or at the first record it
/// cannot read. `offset()` is then the end of the last good record.
pub struct BlockFileScanner {
    reader: BufReader<File>,
    offset: u64,
    file_len: u64,
    torn: bool,
}

impl BlockFileScanner {
    pub fn open(path: &Path, from_offset: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(from_offset))?;
        Ok(Self {
            reader,
            offset: from_offset,
            file_len,
            torn: from_offset > file_len,
        })
    }

    /// End of the last complete record read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the scan stopped on an unreadable record rather than EOF.
    pub fn stopped_on_torn_record(&self) -> bool {
        self.torn
    }

    fn read_record(&mut self) -> Option<Vec<u8>> {
        let len = unsigned_varint::io::read_u64(&mut self.reader).ok()?;
        let prefix_len = record_size(len) - len;
        let remaining = self.file_len.checked_sub(self.offset + prefix_len)?;
        if len > remaining {
            return None;
        }
        let mut bytes = vec![0u8; len as usize];
        self.reader.read_exact(&mut bytes).ok()?;
        self.offset += prefix_len + len;
        Some(bytes)
    }
}

impl Iterator for BlockFileScanner {
    type Item = (u64, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.torn || self.offset >= self.file_len {
            return None;
        }
        let start = self.offset;
        match self.read_record() {
            Some(bytes) => Some((start, bytes)),
            None => {
                self.torn = true;
                None
            }
        }
    }
}

/// SHA-256 over a whole file.
pub fn file_digest(path: &Path) -> io::Result<Hash> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
