//! # Lock Safety
//!
//! - **Stale locks**: detected via PID check
//! - **No deadlock**: non-blocking acquisition with a deadline

use std::path::Path;
use std::time::Duration;

/// Default time to wait for a held lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks if a process with the given PID is still running.
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::path::Path::new(&format!("/proc/{}", pid)).exists()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Validates that a lock file path is within the expected data directory.
pub fn validate_lock_path(data_dir: &Path, lock_path: &Path) -> bool {
    lock_path
        .canonicalize()
        .ok()
        .and_then(|canonical| {
            data_dir
                .canonicalize()
                .ok()
                .map(|data_canonical| canonical.starts_with(&data_canonical))
        })
        .unwrap_or(false)
}
