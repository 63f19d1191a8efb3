//! Response shaping.
//!
//! # Responsibilities
//! - Normalize upstream headers before they reach the client
//! - Rewrite same-origin redirects to relative locations
//! - Attach media diagnostics when asked for
//! - Map upstream failures to gateway errors
//!
//! # Design Decisions
//! - Upstream bodies are streamed through, never buffered
//! - Error bodies are small JSON objects, `{"error": "..."}`
//! - A vanished client gets no body; nobody is listening

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use url::Url;

use crate::error::MediaError;
use crate::media::{BodyStream, StreamMode};
use crate::security::headers::{relax_response, strip, StripOptions};

pub const X_PROXY_STREAM_MODE: HeaderName = HeaderName::from_static("x-proxy-stream-mode");
pub const X_PROXY_RETRY: HeaderName = HeaderName::from_static("x-proxy-retry");
pub const X_PROXY_UPSTREAM_STATUS: HeaderName = HeaderName::from_static("x-proxy-upstream-status");
pub const X_PROXY_ERROR: HeaderName = HeaderName::from_static("x-proxy-error");

/// Non-standard status used in logs and metrics for requests the client abandoned.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Normalize response headers in place.
pub fn shape_headers(status: StatusCode, headers: &mut HeaderMap) {
    if status != StatusCode::SWITCHING_PROTOCOLS {
        strip(headers, StripOptions::default());
    }
    relax_response(headers);
}

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Point a redirect back at the proxy when it stays on the upstream host.
pub fn rewrite_location(headers: &mut HeaderMap, target: &Url) {
    let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let Ok(resolved) = target.join(location) else {
        return;
    };
    if resolved.host_str() != target.host_str() {
        return;
    }
    let relative = match resolved.query() {
        Some(q) => format!("{}?{}", resolved.path(), q),
        None => resolved.path().to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&relative) {
        headers.insert(header::LOCATION, value);
    }
}

/// Diagnostics for media responses.
pub fn add_media_diagnostics(headers: &mut HeaderMap, mode: StreamMode, retry_count: u32, upstream: StatusCode) {
    headers.insert(X_PROXY_STREAM_MODE, HeaderValue::from_static(mode.as_str()));
    headers.insert(X_PROXY_RETRY, HeaderValue::from(retry_count));
    headers.insert(X_PROXY_UPSTREAM_STATUS, HeaderValue::from(upstream.as_u16()));
}

/// Final client response for an upstream reply.
pub fn forward(status: StatusCode, mut headers: HeaderMap, body: BodyStream, target: &Url) -> Response<Body> {
    shape_headers(status, &mut headers);

    let body = if is_redirect(status) {
        rewrite_location(&mut headers, target);
        headers.remove(header::CONTENT_LENGTH);
        Body::empty()
    } else {
        Body::from_stream(body)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Gateway error for a failed upstream exchange.
///
/// With `debug` the message carries the cause and `X-Proxy-Error` names it.
pub fn error_response(err: &MediaError, debug: bool, timeout_ms: u64) -> Response<Body> {
    if err.is_client_abort() {
        return client_closed();
    }

    let status = err.status_code();
    let label = if err.is_timeout() {
        "Gateway Timeout"
    } else {
        "Bad Gateway"
    };
    let message = if debug {
        format!("Proxy Error: {}", err)
    } else {
        label.to_string()
    };

    let mut response = (status, axum::Json(serde_json::json!({ "error": message }))).into_response();
    if debug {
        let detail = if err.is_timeout() {
            format!("Timeout-{}ms", timeout_ms)
        } else {
            format!("Upstream-{}", err)
        };
        if let Ok(value) = HeaderValue::from_str(&detail) {
            response.headers_mut().insert(X_PROXY_ERROR, value);
        }
    }
    response
}

/// Empty 499 for a client that disconnected.
pub fn client_closed() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() =
        StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST);
    response
}

/// 413 for an oversized request body.
pub fn payload_too_large() -> Response<Body> {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        axum::Json(serde_json::json!({ "error": "Payload Too Large" })),
    )
        .into_response()
}
