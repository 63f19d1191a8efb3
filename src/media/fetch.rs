//! Raw upstream fetch primitive.
//!
//! The engine only needs "send a request, get status + headers + a byte
//! stream, and stop when told to". `Fetcher` is that seam; `HttpFetcher` is
//! the production implementation on top of reqwest.

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::MediaError;

/// Response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, MediaError>>;

/// An empty body.
pub fn empty_body() -> BodyStream {
    futures_util::stream::empty().boxed()
}

/// Request sent to the origin. Cheap to clone so attempts can be replayed.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Status, headers and the still-unread body of an origin response.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends one request upstream.
///
/// Implementations must stop waiting for headers once `cancel` fires and
/// should end the body stream when it fires later.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: UpstreamRequest,
        cancel: CancellationToken,
    ) -> Result<UpstreamResponse, MediaError>;
}

/// reqwest-backed fetcher. Redirects are returned to the caller, not followed.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }

    /// Underlying client, shared with the upgrade tunnel.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: UpstreamRequest,
        cancel: CancellationToken,
    ) -> Result<UpstreamResponse, MediaError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(MediaError::Transport("request aborted".to_string()));
            }
            res = builder.send() => res.map_err(|e| MediaError::Transport(e.to_string()))?,
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| MediaError::Transport(e.to_string())))
            .take_until(cancel.cancelled_owned())
            .boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
