//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every external call (key service, key store)
//! - Report which operation timed out and after how long
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Timeout errors are distinct from the call's own errors
//! - Nothing here retries; callers decide

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Deadline applied to external calls unless configured otherwise.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// An external call did not complete before its deadline.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{operation} timed out after {}ms", .after.as_millis())]
pub struct TimeoutError {
    pub operation: &'static str,
    pub after: Duration,
}

/// Run `future` with a deadline of `after`.
pub async fn with_timeout<F, T>(
    operation: &'static str,
    after: Duration,
    future: F,
) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(after, future).await {
        Ok(value) => Ok(value),
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = after.as_millis() as u64,
                "External call timed out"
            );
            Err(TimeoutError { operation, after })
        }
    }
}
