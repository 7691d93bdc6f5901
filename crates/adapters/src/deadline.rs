use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::{AdapterError, Operation};

/// Run an adapter call under a deadline
///
/// Expiry yields `AdapterError::Timeout`. The inner future is dropped, but the remote
/// side may already have acted, so callers must treat a timeout as an unknown outcome.
pub async fn with_deadline<T, F>(
    timeout: Duration,
    operation: Operation,
    call: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            let after_ms = timeout.as_millis() as u64;
            warn!(operation = %operation, after_ms, "adapter call exceeded deadline");
            Err(AdapterError::Timeout {
                operation,
                after_ms,
            })
        }
    }
}
