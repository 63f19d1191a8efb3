//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create Axum Router with the admin API and the proxy fallback
//! - Wire up middleware (tracing, request ID)
//! - Bind server to listener with graceful shutdown
//! - Resolve the upstream from the route store for every request
//! - Dispatch: media engine, upgrade tunnel, or a single bounded fetch
//! - Observability (metrics, correlation IDs)

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use url::Url;

use super::request::{read_body, request_host, resolve_target, upstream_headers, wants_debug};
use super::response::{
    add_media_diagnostics, error_response, forward, payload_too_large, CLIENT_CLOSED_REQUEST,
};
use super::websocket::{self, Handshake};
use crate::admin;
use crate::config::ProxyConfig;
use crate::error::MediaError;
use crate::media::{Fetcher, HttpFetcher, MediaEngine, MediaPolicy, UpstreamRequest};
use crate::observability::metrics;
use crate::resilience::timeouts::fetch_with_deadline;
use crate::routing::matcher::{classify, RequestKind};
use crate::routing::RouteStore;

/// Paths reserved for the management surface; never proxied.
pub const MANAGE_PREFIX: &str = "/manage";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<ProxyConfig>>,
    pub routes: RouteStore,
    pub media: MediaEngine,
    pub fetcher: Arc<dyn Fetcher>,
    /// Raw client for upgrade handshakes.
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Arc<ArcSwap<ProxyConfig>>, routes: RouteStore, http: HttpFetcher) -> Self {
        let client = http.client().clone();
        let fetcher: Arc<dyn Fetcher> = Arc::new(http);
        Self {
            config,
            routes,
            media: MediaEngine::new(fetcher.clone()),
            fetcher,
            client,
        }
    }

    /// Replace the upstream fetcher for both media and ordinary requests.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.media = MediaEngine::new(fetcher.clone());
        self.fetcher = fetcher;
        self
    }
}

/// HTTP server for the edge proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = Self::build_router(state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let config = state.config.load_full();
        let mut router = Router::new();
        if config.admin.enabled {
            router = router.nest(
                "/manage/api",
                admin::router(state.clone(), Duration::from_secs(config.timeouts.admin_request_secs)),
            );
        }

        router
            .fallback(proxy_handler)
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Router with all layers, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn is_manage_path(path: &str) -> bool {
    path == MANAGE_PREFIX || path.starts_with("/manage/")
}

/// Main proxy handler.
///
/// Dropping this future (client gone) cancels every upstream wait through
/// the request's cancellation token. Once a response exists the guard is
/// disarmed and body delivery owns teardown.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let kind = classify(request.method(), request.uri().path(), request.headers());

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let response = dispatch(&state, kind, request, &cancel).await;
    guard.disarm();

    metrics::record_request(kind.as_str(), response.status().as_u16(), start);
    response
}

async fn dispatch(
    state: &AppState,
    kind: RequestKind,
    request: Request<Body>,
    cancel: &CancellationToken,
) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let path = request.uri().path().to_string();

    if is_manage_path(&path) {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "error": "Not Found" })),
        )
            .into_response();
    }

    let config = state.config.load_full();
    let debug = wants_debug(config.observability.debug_headers, request.headers());
    let host = request_host(request.headers(), request.uri());

    let fallback = match Url::parse(&config.upstream.default_url) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Default upstream is not a valid URL");
            return error_response(&MediaError::Transport(e.to_string()), debug, 0);
        }
    };

    let routes = state.routes.load().await;
    let target = resolve_target(&routes.mappings, &host, request.uri(), &fallback);
    let headers = upstream_headers(request.headers(), &target, kind);

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        path = %path,
        kind = kind.as_str(),
        route_version = ?routes.version,
        route_source = routes.source.as_str(),
        upstream = %target.origin().ascii_serialization(),
        "Proxying request"
    );

    if kind == RequestKind::Upgrade {
        let deadline = config.upstream.api_timeout_ms;
        let handshake = tokio::time::timeout(
            Duration::from_millis(deadline),
            websocket::tunnel(&state.client, request, &target, headers),
        );
        return match handshake.await {
            Ok(Ok(Handshake::Upgraded(response))) | Ok(Ok(Handshake::Refused(response))) => response,
            Ok(Err(e)) => {
                tracing::warn!(request_id = %request_id, error = %e, "Upgrade handshake failed");
                error_response(&e, debug, deadline)
            }
            Err(_) => error_response(&MediaError::TtfbTimeout(deadline), debug, deadline),
        };
    }

    let method = request.method().clone();
    let (parts, body) = request.into_parts();
    let body = match read_body(&parts.headers, body, config.upstream.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!(request_id = %request_id, path = %path, "Request body over limit");
            return payload_too_large();
        }
    };
    let upstream = UpstreamRequest {
        method,
        url: target.clone(),
        headers,
        body,
    };

    if kind == RequestKind::Media {
        let policy = MediaPolicy::from(&config.media);
        let ttfb_ms = policy.ttfb_timeout.as_millis() as u64;
        return match state.media.fetch_with_retries(upstream, &policy, cancel).await {
            Ok(media) => {
                let mut response = forward(media.status, media.headers, media.body, &target);
                if debug {
                    add_media_diagnostics(response.headers_mut(), media.mode, media.retry_count, media.status);
                }
                response
            }
            Err(e) => {
                log_failure(&request_id, &path, &e);
                error_response(&e, debug, ttfb_ms)
            }
        };
    }

    let deadline_ms = if kind == RequestKind::Critical {
        config.upstream.critical_timeout_ms
    } else {
        config.upstream.api_timeout_ms
    };
    let attempt = cancel.child_token();
    match fetch_with_deadline(
        state.fetcher.as_ref(),
        upstream,
        Duration::from_millis(deadline_ms),
        attempt,
        cancel,
    )
    .await
    {
        Ok(res) => forward(res.status, res.headers, res.body, &target),
        Err(e) => {
            log_failure(&request_id, &path, &e);
            error_response(&e, debug, deadline_ms)
        }
    }
}

fn log_failure(request_id: &str, path: &str, err: &MediaError) {
    if err.is_client_abort() {
        tracing::debug!(request_id, path, status = CLIENT_CLOSED_REQUEST, "Client went away");
    } else {
        tracing::warn!(request_id, path, error = %err, kind = err.kind(), "Upstream request failed");
    }
}
