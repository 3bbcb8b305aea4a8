//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other upstream errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

use crate::error::UpstreamError;

/// Run an upstream call under a deadline. The call is dropped (cancelled)
/// when the deadline passes.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout(deadline)),
    }
}
