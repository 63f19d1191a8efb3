//! Supervised response body.
//!
//! A pull-based stream over the upstream body with two deadlines:
//!
//! ```text
//! headers ──▶ AwaitingFirstByte ──first chunk──▶ Streaming ──EOF──▶ Finished
//!                  │ first-body deadline            │ idle deadline
//!                  ▼                                ▼
//!              Finished (first-body-timeout)    Finished (idle-timeout)
//! ```
//!
//! The idle deadline is re-armed only once `progress_threshold_bytes` have
//! arrived since the last re-arm, so a trickle cannot keep a stalled
//! transfer alive. Timers are polled with the stream and fire while the
//! consumer is waiting on it. Teardown happens exactly once, whatever the
//! trigger: EOF, error, timeout, client cancellation or drop.

use bytes::Bytes;
use futures_util::stream::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::fetch::{empty_body, BodyStream};
use super::policy::MediaPolicy;
use crate::error::MediaError;
use crate::observability::metrics;

/// Why a supervised stream was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Completed,
    ClientAbort,
    FirstBodyTimeout,
    IdleTimeout,
    TransportError,
}

impl TeardownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownReason::Completed => "completed",
            TeardownReason::ClientAbort => "client-abort",
            TeardownReason::FirstBodyTimeout => "first-body-timeout",
            TeardownReason::IdleTimeout => "idle-timeout",
            TeardownReason::TransportError => "transport-error",
        }
    }
}

struct TeardownState {
    done: AtomicBool,
    count: AtomicU32,
    reason: Mutex<Option<TeardownReason>>,
    upstream: CancellationToken,
}

/// Shared, idempotent teardown of one upstream attempt.
#[derive(Clone)]
pub struct TeardownHandle {
    state: Arc<TeardownState>,
}

impl std::fmt::Debug for TeardownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownHandle")
            .field("count", &self.teardown_count())
            .field("reason", &self.reason())
            .finish()
    }
}

impl TeardownHandle {
    pub fn new(upstream: CancellationToken) -> Self {
        Self {
            state: Arc::new(TeardownState {
                done: AtomicBool::new(false),
                count: AtomicU32::new(0),
                reason: Mutex::new(None),
                upstream,
            }),
        }
    }

    /// Cancel on behalf of the client. Returns false if already torn down.
    pub fn cancel(&self) -> bool {
        self.teardown(TeardownReason::ClientAbort)
    }

    /// Abort upstream and record `reason`. Only the first call has any effect.
    pub fn teardown(&self, reason: TeardownReason) -> bool {
        if self.state.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.count.fetch_add(1, Ordering::AcqRel);
        match self.state.reason.lock() {
            Ok(mut slot) => *slot = Some(reason),
            Err(poisoned) => *poisoned.into_inner() = Some(reason),
        }
        self.state.upstream.cancel();
        metrics::record_stream_teardown(reason.as_str());
        tracing::debug!(reason = reason.as_str(), "Media stream torn down");
        true
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    /// Number of times the upstream was actually aborted. Never exceeds one.
    pub fn teardown_count(&self) -> u32 {
        self.state.count.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<TeardownReason> {
        match self.state.reason.lock() {
            Ok(slot) => *slot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingFirstByte,
    Streaming,
    Finished,
}

pub struct SupervisedStream {
    inner: BodyStream,
    phase: Phase,
    deadline: Pin<Box<Sleep>>,
    client: Pin<Box<WaitForCancellationFutureOwned>>,
    first_body_timeout: Duration,
    idle_timeout: Duration,
    threshold: u64,
    bytes_since_reset: u64,
    teardown: TeardownHandle,
}

impl SupervisedStream {
    /// Supervise `body`. `upstream` aborts the attempt; `client` is the
    /// downstream cancellation signal.
    pub fn new(
        body: BodyStream,
        upstream: CancellationToken,
        client: CancellationToken,
        policy: &MediaPolicy,
    ) -> Self {
        Self {
            inner: body,
            phase: Phase::AwaitingFirstByte,
            deadline: Box::pin(tokio::time::sleep(policy.first_body_timeout)),
            client: Box::pin(client.cancelled_owned()),
            first_body_timeout: policy.first_body_timeout,
            idle_timeout: policy.idle_timeout,
            threshold: policy.progress_threshold_bytes.max(1),
            bytes_since_reset: 0,
            teardown: TeardownHandle::new(upstream),
        }
    }

    pub fn handle(&self) -> TeardownHandle {
        self.teardown.clone()
    }

    fn finish(&mut self, reason: TeardownReason) {
        self.phase = Phase::Finished;
        self.inner = empty_body();
        self.teardown.teardown(reason);
    }

    fn rearm_idle(&mut self) {
        self.bytes_since_reset = 0;
        self.deadline
            .as_mut()
            .reset(Instant::now() + self.idle_timeout);
    }
}

impl Stream for SupervisedStream {
    type Item = Result<Bytes, MediaError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.phase == Phase::Finished {
            return Poll::Ready(None);
        }
        if this.teardown.is_torn_down() || this.client.as_mut().poll(cx).is_ready() {
            this.finish(TeardownReason::ClientAbort);
            return Poll::Ready(None);
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if this.phase == Phase::AwaitingFirstByte {
                        this.phase = Phase::Streaming;
                        this.rearm_idle();
                    }
                    this.bytes_since_reset += chunk.len() as u64;
                    if this.bytes_since_reset >= this.threshold {
                        this.rearm_idle();
                    }
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finish(TeardownReason::TransportError);
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finish(TeardownReason::Completed);
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            let (reason, err) = match this.phase {
                Phase::AwaitingFirstByte => (
                    TeardownReason::FirstBodyTimeout,
                    MediaError::FirstBodyTimeout(this.first_body_timeout.as_millis() as u64),
                ),
                _ => (
                    TeardownReason::IdleTimeout,
                    MediaError::IdleTimeout(this.idle_timeout.as_millis() as u64),
                ),
            };
            tracing::warn!(reason = reason.as_str(), "Upstream media stream stalled");
            this.finish(reason);
            return Poll::Ready(Some(Err(err)));
        }

        Poll::Pending
    }
}

impl Drop for SupervisedStream {
    fn drop(&mut self) {
        if self.phase != Phase::Finished {
            self.teardown.teardown(TeardownReason::ClientAbort);
        }
    }
}
