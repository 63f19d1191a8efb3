//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound the wait for upstream response headers
//! - Bound every durable store / edge cache call
//! - Cancel the in-flight operation cleanly on timeout or client abort
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{MediaError, StoreError};
use crate::media::fetch::{Fetcher, UpstreamRequest, UpstreamResponse};

/// Fetch with a deadline on the response headers.
///
/// `attempt` is the per-attempt abort token and should be a child of
/// `client` so a downstream disconnect reaches the fetcher directly. On
/// deadline expiry the attempt is aborted and `TtfbTimeout` returned; on
/// client cancellation `ClientAbort` wins over every other outcome.
pub async fn fetch_with_deadline(
    fetcher: &dyn Fetcher,
    request: UpstreamRequest,
    deadline: Duration,
    attempt: CancellationToken,
    client: &CancellationToken,
) -> Result<UpstreamResponse, MediaError> {
    tokio::select! {
        biased;
        _ = client.cancelled() => {
            attempt.cancel();
            Err(MediaError::ClientAbort)
        }
        res = tokio::time::timeout(deadline, fetcher.fetch(request, attempt.clone())) => match res {
            Ok(result) => result,
            Err(_) => {
                attempt.cancel();
                Err(MediaError::TtfbTimeout(deadline.as_millis() as u64))
            }
        },
    }
}

/// Bound a single storage adapter call.
pub async fn with_op_timeout<T, F>(deadline: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline.as_millis() as u64)),
    }
}
