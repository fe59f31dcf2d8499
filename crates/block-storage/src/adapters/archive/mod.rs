//! Archive Adapters
//!
//! Implementations of the `ArchiveClient` port.

mod fs;
mod memory;

pub use fs::{is_temp_name, FsArchiveClient};
pub(crate) use fs::temp_file_for;
pub use memory::InMemoryArchiveClient;
