//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Forward the upgrade handshake to the upstream over HTTP/1.1
//! - Relay the upstream `101 Switching Protocols` to the client
//! - Splice both upgraded connections together
//!
//! # Data Flow
//! ```text
//! Client ←──── raw bytes ────→ Proxy ←──── raw bytes ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Byte-level tunnel after the handshake; frames are not parsed
//! - A refused upgrade (any status but 101) is forwarded like a normal response
//! - Either side closing ends the tunnel

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use futures_util::{StreamExt, TryStreamExt};
use hyper_util::rt::TokioIo;
use url::Url;

use super::response::{forward, shape_headers};
use crate::error::MediaError;
use crate::media::BodyStream;

/// Outcome of forwarding a handshake.
pub enum Handshake {
    /// Upstream accepted; the client gets this 101 and the tunnel runs in the background.
    Upgraded(Response<Body>),
    /// Upstream answered with something else.
    Refused(Response<Body>),
}

/// Forward an upgrade request to `target` and wire up the tunnel.
pub async fn tunnel(
    client: &reqwest::Client,
    mut request: Request<Body>,
    target: &Url,
    headers: HeaderMap,
) -> Result<Handshake, MediaError> {
    let client_upgrade = hyper::upgrade::on(&mut request);

    let upstream = client
        .get(target.clone())
        .version(reqwest::Version::HTTP_11)
        .headers(headers)
        .send()
        .await
        .map_err(|e| MediaError::Transport(e.to_string()))?;

    let status = upstream.status();
    if status != StatusCode::SWITCHING_PROTOCOLS {
        tracing::debug!(url = %target, status = status.as_u16(), "Upstream refused upgrade");
        let headers = upstream.headers().clone();
        let body: BodyStream = upstream
            .bytes_stream()
            .map_err(|e| MediaError::Transport(e.to_string()))
            .boxed();
        return Ok(Handshake::Refused(forward(status, headers, body, target)));
    }

    let mut headers = upstream.headers().clone();
    shape_headers(status, &mut headers);

    let url = target.clone();
    tokio::spawn(async move {
        let upstream_io = match upstream.upgrade().await {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Upstream upgrade failed");
                return;
            }
        };
        let client_io = match client_upgrade.await {
            Ok(io) => io,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Client upgrade failed");
                return;
            }
        };

        let mut upstream_io = upstream_io;
        let mut client_io = TokioIo::new(client_io);
        match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
            Ok((sent, received)) => {
                tracing::debug!(url = %url, sent, received, "WebSocket tunnel closed");
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "WebSocket tunnel ended with error");
            }
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *response.headers_mut() = headers;
    Ok(Handshake::Upgraded(response))
}
