//! Bounded retry for archive transfers.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::config::TransferPolicy;
use super::errors::{ArchiveClientError, StorageError};
use super::value_objects::FileId;

/// Run `op` under `policy`: per-attempt deadline, exponential backoff,
/// `policy.attempts` tries at most.
///
/// `NotPresent` is final and not retried. A timed out attempt counts as a
/// failure. Cancellation interrupts both an attempt and the backoff sleep.
pub async fn with_retry<T, F, Fut>(
    policy: &TransferPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    file_id: FileId,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ArchiveClientError>>,
{
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut last_error = ArchiveClientError::Io {
        message: "no attempt made".to_string(),
    };

    for attempt in 1..=attempts {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            r = tokio::time::timeout(policy.attempt_timeout, op()) => r,
        };

        let err = match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e @ ArchiveClientError::NotPresent { .. })) => return Err(e.into_storage(file_id)),
            Ok(Err(e)) => e,
            Err(_) => ArchiveClientError::Timeout {
                secs: policy.attempt_timeout.as_secs(),
            },
        };

        tracing::warn!(
            file_id,
            attempt,
            attempts,
            error = %err,
            "[archiver] {} attempt failed",
            operation
        );
        last_error = err;

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2);
        }
    }

    Err(last_error.into_storage(file_id))
}
