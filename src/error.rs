//! Error types shared across the route store and the media engine.

use axum::http::StatusCode;
use thiserror::Error;

/// Result alias for route store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors produced by the route configuration store and its adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Expected version did not match the pointer at the instant of the check.
    #[error("version conflict: expected {expected:?}, current {current:?}")]
    VersionConflict {
        expected: Option<String>,
        current: Option<String>,
    },

    /// Rollback target document does not exist.
    #[error("route document {0} not found")]
    NotFound(String),

    /// Rollback requested without a target and the pointer records no previous version.
    #[error("no previous version recorded")]
    NoPreviousVersion,

    /// Durable store exhausted its bounded retries.
    #[error("durable store unavailable: {0}")]
    SourceUnavailable(String),

    /// A single adapter call failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A single adapter call exceeded its deadline.
    #[error("storage operation timed out after {0} ms")]
    Timeout(u64),
}

impl StoreError {
    /// HTTP status for admin-facing responses.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::VersionConflict { .. } => StatusCode::CONFLICT,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::NoPreviousVersion => StatusCode::BAD_REQUEST,
            StoreError::SourceUnavailable(_) | StoreError::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            StoreError::Backend(_) | StoreError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Failure classes of upstream media delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// No status line/headers before the TTFB deadline.
    #[error("upstream did not send headers within {0} ms")]
    TtfbTimeout(u64),

    /// Headers arrived but no body chunk before the first-body deadline.
    #[error("upstream sent no body within {0} ms")]
    FirstBodyTimeout(u64),

    /// Transfer stalled below the progress threshold for the idle window.
    #[error("upstream stalled for {0} ms")]
    IdleTimeout(u64),

    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The downstream client went away. Not reported as an error.
    #[error("client aborted")]
    ClientAbort,
}

impl MediaError {
    /// Stable short name used in logs, metrics and diagnostics headers.
    pub fn kind(&self) -> &'static str {
        match self {
            MediaError::TtfbTimeout(_) => "ttfb-timeout",
            MediaError::FirstBodyTimeout(_) => "first-body-timeout",
            MediaError::IdleTimeout(_) => "idle-timeout",
            MediaError::Transport(_) => "transport-error",
            MediaError::ClientAbort => "client-abort",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            MediaError::TtfbTimeout(_) | MediaError::FirstBodyTimeout(_) | MediaError::IdleTimeout(_)
        )
    }

    pub fn is_client_abort(&self) -> bool {
        matches!(self, MediaError::ClientAbort)
    }

    /// Whether another attempt may succeed. Client aborts never are.
    pub fn is_retryable(&self) -> bool {
        !self.is_client_abort()
    }

    /// Gateway status the dispatcher reports for this failure.
    pub fn status_code(&self) -> StatusCode {
        if self.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        }
    }
}
