//! Request handling and transformation.
//!
//! # Responsibilities
//! - Extract routing-relevant information (host, path, debug flag)
//! - Resolve the upstream target from the loaded routing table
//! - Prepare headers and body for forwarding upstream
//!
//! # Design Decisions
//! - Request ID is assigned by middleware before the handler runs and is
//!   forwarded upstream unchanged
//! - Bodies are buffered (bounded) so idempotent attempts can be replayed
//! - Original request preserved for logging; modified copy forwarded

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Uri};
use bytes::Bytes;
use url::Url;

use crate::routing::matcher::RequestKind;
use crate::routing::router::{select_upstream, target_url};
use crate::routing::Mappings;
use crate::security::headers::{scrub_client_identity, strip, StripOptions};

pub const X_PROXY_DEBUG: &str = "x-proxy-debug";

/// Host the client addressed, from `Host` or the absolute URI.
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| uri.host().map(str::to_owned))
        .unwrap_or_default()
}

/// Diagnostics headers are on globally or requested with `x-proxy-debug: 1`.
pub fn wants_debug(enabled: bool, headers: &HeaderMap) -> bool {
    enabled
        || headers
            .get(X_PROXY_DEBUG)
            .map(|v| v.as_bytes() == b"1")
            .unwrap_or(false)
}

/// Full upstream URL for this request.
pub fn resolve_target(mappings: &Mappings, host: &str, uri: &Uri, fallback: &Url) -> Url {
    let base = select_upstream(mappings, host, fallback);
    target_url(&base, uri.path(), uri.query())
}

/// `host[:port]` of a URL as it belongs in a `Host` header.
fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Headers sent to the origin.
///
/// `Host`, `Referer` and `Origin` point at the upstream, client identity
/// headers are dropped and hop-by-hop headers stripped (kept for upgrades).
/// Media requests ask for `identity` encoding so byte ranges line up.
pub fn upstream_headers(original: &HeaderMap, target: &Url, kind: RequestKind) -> HeaderMap {
    let mut headers = original.clone();
    let origin = target.origin().ascii_serialization();

    if let Some(host) = host_header(target).and_then(|h| HeaderValue::from_str(&h).ok()) {
        headers.insert(header::HOST, host);
    }
    if let Ok(origin) = HeaderValue::from_str(&origin) {
        headers.insert(header::REFERER, origin.clone());
        headers.insert(header::ORIGIN, origin);
    }

    scrub_client_identity(&mut headers);
    strip(
        &mut headers,
        StripOptions {
            preserve_upgrade: kind == RequestKind::Upgrade,
            is_request_side: true,
        },
    );
    headers.remove(header::CONTENT_LENGTH);

    if kind == RequestKind::Media {
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
    headers
}

/// Request body exceeded the buffering limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyTooLarge;

/// Buffer the request body, refusing anything above `limit` bytes.
pub async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, BodyTooLarge> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.map(|len| len > limit).unwrap_or(false) {
        return Err(BodyTooLarge);
    }
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        tracing::debug!(error = %e, "Request body rejected");
        BodyTooLarge
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteMapping;

    fn incoming() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("tv.example.com"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.9"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        headers.insert("cf-ray", HeaderValue::from_static("abc"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-hop"));
        headers.insert("x-hop", HeaderValue::from_static("1"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("3"));
        headers.insert("x-emby-token", HeaderValue::from_static("secret"));
        headers
    }

    #[test]
    fn test_upstream_headers_rewrite() {
        let target = Url::parse("http://origin.example.net:8096/Users").unwrap();
        let headers = upstream_headers(&incoming(), &target, RequestKind::Api);

        assert_eq!(headers.get(header::HOST).unwrap(), "origin.example.net:8096");
        assert_eq!(headers.get(header::REFERER).unwrap(), "http://origin.example.net:8096");
        assert_eq!(headers.get(header::ORIGIN).unwrap(), "http://origin.example.net:8096");
        for gone in ["cf-connecting-ip", "x-forwarded-for", "cf-ray", "connection", "x-hop", "content-length"] {
            assert!(!headers.contains_key(gone), "{gone}");
        }
        assert_eq!(headers.get(header::ACCEPT_ENCODING).unwrap(), "gzip");
        assert_eq!(headers.get("x-emby-token").unwrap(), "secret");
    }

    #[test]
    fn test_media_requests_use_identity_encoding() {
        let target = Url::parse("https://origin.example.net/Videos/1/stream").unwrap();
        let headers = upstream_headers(&incoming(), &target, RequestKind::Media);
        assert_eq!(headers.get(header::ACCEPT_ENCODING).unwrap(), "identity");
        assert_eq!(headers.get(header::HOST).unwrap(), "origin.example.net");
    }

    #[test]
    fn test_upgrade_keeps_handshake_headers() {
        let mut original = HeaderMap::new();
        original.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        original.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        let target = Url::parse("http://origin.example.net/socket").unwrap();
        let headers = upstream_headers(&original, &target, RequestKind::Upgrade);
        assert_eq!(headers.get(header::UPGRADE).unwrap(), "websocket");
        assert_eq!(headers.get(header::CONNECTION).unwrap(), "Upgrade");
    }

    #[test]
    fn test_debug_flag() {
        let mut headers = HeaderMap::new();
        assert!(!wants_debug(false, &headers));
        assert!(wants_debug(true, &headers));
        headers.insert(X_PROXY_DEBUG, HeaderValue::from_static("1"));
        assert!(wants_debug(false, &headers));
    }

    #[test]
    fn test_resolve_target() {
        let mut mappings = Mappings::new();
        mappings.insert(
            "tv".into(),
            RouteMapping::new("https://origin.example.net").with_prefix("/jf"),
        );
        let fallback = Url::parse("https://fallback.example.net").unwrap();
        let uri: Uri = "/Items?Recursive=true".parse().unwrap();

        assert_eq!(
            resolve_target(&mappings, "tv.example.com", &uri, &fallback).as_str(),
            "https://origin.example.net/jf/Items?Recursive=true"
        );
        assert_eq!(
            resolve_target(&mappings, "example.com", &uri, &fallback).as_str(),
            "https://fallback.example.net/Items?Recursive=true"
        );
    }

    #[tokio::test]
    async fn test_body_limit() {
        let headers = HeaderMap::new();
        let ok = read_body(&headers, Body::from("abc"), 8).await.unwrap();
        assert_eq!(&ok[..], b"abc");
        assert_eq!(
            read_body(&headers, Body::from("0123456789"), 8).await,
            Err(BodyTooLarge)
        );

        let mut declared = HeaderMap::new();
        declared.insert(header::CONTENT_LENGTH, HeaderValue::from_static("100"));
        assert_eq!(read_body(&declared, Body::empty(), 8).await, Err(BodyTooLarge));
    }
}
