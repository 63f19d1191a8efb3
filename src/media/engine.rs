//! Media delivery reliability engine.
//!
//! # Responsibilities
//! - Bound the wait for upstream headers, retrying idempotent requests
//! - Never retry 4xx; retry 5xx and transport failures while budget remains
//! - Pass well-behaved media through, supervise everything else
//!
//! # State Machine
//! ```text
//! Attempting ──headers──▶ 5xx, retryable ──▶ Retrying ──backoff──▶ Attempting
//!     │                   4xx            ──▶ ClientError (error-4xx)
//!     │                   otherwise      ──▶ Success (bypass | wrap)
//!     └──error──▶ retryable ──▶ Retrying
//!                 exhausted ──▶ Failed (error, or fallback after an earlier 5xx)
//! ```
//!
//! # Design Decisions
//! - Each attempt has its own cancellation token, a child of the client's
//! - A retried attempt starts from byte zero; no resumption across attempts
//! - Client aborts end the loop immediately and are never retried

use axum::http::{header, HeaderMap, StatusCode};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::classify::should_bypass;
use super::fetch::{empty_body, BodyStream, Fetcher, UpstreamRequest, UpstreamResponse};
use super::policy::MediaPolicy;
use super::supervised::{SupervisedStream, TeardownHandle};
use crate::error::MediaError;
use crate::observability::metrics;
use crate::resilience::retries::is_idempotent;
use crate::resilience::timeouts::fetch_with_deadline;

/// How the body of a media response is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Raw upstream stream, unsupervised.
    Bypass,
    /// Supervised by first-body and idle deadlines.
    Wrap,
    /// Upstream 4xx, passed through untouched.
    Error4xx,
    /// Retries exhausted; the last upstream 5xx is surfaced.
    Fallback,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Bypass => "bypass",
            StreamMode::Wrap => "wrap",
            StreamMode::Error4xx => "error-4xx",
            StreamMode::Fallback => "fallback",
        }
    }
}

pub struct MediaResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
    /// Retries performed before this response, 0 on first-try success.
    pub retry_count: u32,
    pub mode: StreamMode,
    /// Present for wrapped bodies.
    pub teardown: Option<TeardownHandle>,
}

impl std::fmt::Debug for MediaResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaResponse")
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct MediaEngine {
    fetcher: Arc<dyn Fetcher>,
}

impl MediaEngine {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch `request`, retrying within `policy`, and shape the body.
    pub async fn fetch_with_retries(
        &self,
        request: UpstreamRequest,
        policy: &MediaPolicy,
        client: &CancellationToken,
    ) -> Result<MediaResponse, MediaError> {
        let result = self.run(request, policy, client).await;
        match &result {
            Ok(res) => metrics::record_media_response(res.mode.as_str()),
            Err(e) => metrics::record_media_response(e.kind()),
        }
        result
    }

    async fn run(
        &self,
        request: UpstreamRequest,
        policy: &MediaPolicy,
        client: &CancellationToken,
    ) -> Result<MediaResponse, MediaError> {
        let idempotent = is_idempotent(&request.method);
        let ranged = request.headers.contains_key(header::RANGE);
        let mut last_server_error: Option<(StatusCode, HeaderMap)> = None;
        let mut attempt: u32 = 0;

        loop {
            if client.is_cancelled() {
                return Err(MediaError::ClientAbort);
            }
            let can_retry = idempotent && attempt < policy.max_retries;
            let token = client.child_token();

            let result = fetch_with_deadline(
                self.fetcher.as_ref(),
                request.clone(),
                policy.ttfb_timeout,
                token.clone(),
                client,
            )
            .await;

            match result {
                Ok(res) => {
                    let status = res.status;

                    if status.is_server_error() && idempotent {
                        metrics::record_media_attempt("server-error");
                        if can_retry {
                            tracing::debug!(
                                url = %request.url,
                                status = status.as_u16(),
                                attempt,
                                "Upstream 5xx, retrying"
                            );
                            token.cancel();
                            last_server_error = Some((status, res.headers));
                            self.backoff(policy, attempt, client).await?;
                            attempt += 1;
                            continue;
                        }
                        tracing::warn!(
                            url = %request.url,
                            status = status.as_u16(),
                            retries = attempt,
                            "Upstream 5xx after retries, returning fallback"
                        );
                        return Ok(passthrough(res, attempt, StreamMode::Fallback));
                    }

                    if status.is_client_error() {
                        metrics::record_media_attempt("client-error");
                        return Ok(passthrough(res, attempt, StreamMode::Error4xx));
                    }

                    metrics::record_media_attempt("ok");
                    if should_bypass(status, &res.headers, ranged, &request.url) {
                        return Ok(passthrough(res, attempt, StreamMode::Bypass));
                    }

                    let supervised = SupervisedStream::new(res.body, token, client.clone(), policy);
                    let handle = supervised.handle();
                    return Ok(MediaResponse {
                        status,
                        headers: res.headers,
                        body: supervised.boxed(),
                        retry_count: attempt,
                        mode: StreamMode::Wrap,
                        teardown: Some(handle),
                    });
                }
                Err(e) => {
                    metrics::record_media_attempt(e.kind());
                    if e.is_client_abort() {
                        tracing::debug!(url = %request.url, "Client went away during media fetch");
                        return Err(e);
                    }
                    if can_retry && e.is_retryable() {
                        tracing::debug!(url = %request.url, attempt, error = %e, "Media attempt failed, retrying");
                        self.backoff(policy, attempt, client).await?;
                        attempt += 1;
                        continue;
                    }
                    if let Some((status, headers)) = last_server_error.take() {
                        tracing::warn!(
                            url = %request.url,
                            status = status.as_u16(),
                            error = %e,
                            "Media retries exhausted, returning last upstream 5xx"
                        );
                        return Ok(MediaResponse {
                            status,
                            headers,
                            body: empty_body(),
                            retry_count: attempt,
                            mode: StreamMode::Fallback,
                            teardown: None,
                        });
                    }
                    tracing::warn!(url = %request.url, retries = attempt, error = %e, "Media fetch failed");
                    return Err(e);
                }
            }
        }
    }

    /// Sleep before retry `attempt`, cut short by the client going away.
    async fn backoff(
        &self,
        policy: &MediaPolicy,
        attempt: u32,
        client: &CancellationToken,
    ) -> Result<(), MediaError> {
        let delay = policy.backoff_for(attempt);
        tokio::select! {
            _ = client.cancelled() => Err(MediaError::ClientAbort),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn passthrough(res: UpstreamResponse, retry_count: u32, mode: StreamMode) -> MediaResponse {
    MediaResponse {
        status: res.status,
        headers: res.headers,
        body: res.body,
        retry_count,
        mode,
        teardown: None,
    }
}
