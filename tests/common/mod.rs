//! Shared utilities for integration testing.
#![allow(dead_code)]

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use edge_media_proxy::config::ProxyConfig;
use edge_media_proxy::error::{MediaError, StoreError, StoreResult};
use edge_media_proxy::http::{AppState, HttpServer};
use edge_media_proxy::kv::memory::{MemoryDurableStore, MemoryEdgeCache};
use edge_media_proxy::kv::{DurableStore, EdgeCache};
use edge_media_proxy::lifecycle::Shutdown;
use edge_media_proxy::media::{BodyStream, Fetcher, HttpFetcher, UpstreamRequest, UpstreamResponse};
use edge_media_proxy::routing::{RouteCache, RouteStore};

pub const ADMIN_KEY: &str = "test-admin-key";

/// Request head as seen by the mock backend.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the mock backend answers.
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Start a programmable raw-TCP backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(SeenRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(seen) = read_head(&mut socket).await else {
                            return;
                        };
                        let reply = f(seen).await;
                        let reason = StatusCode::from_u16(reply.status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");
                        let mut head = format!("HTTP/1.1 {} {}\r\n", reply.status, reason);
                        for (name, value) in &reply.headers {
                            head.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        head.push_str(&format!(
                            "Content-Length: {}\r\nConnection: close\r\n\r\n",
                            reply.body.len()
                        ));
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(reply.body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> Option<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut have = buf.len() - (end + 4);
    while have < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        have += n;
    }

    Some(SeenRequest {
        method,
        path,
        headers,
    })
}

/// Config for an in-process proxy pointed at `default_upstream`.
pub fn test_config(default_upstream: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.default_url = default_upstream.to_string();
    config.admin.api_key = ADMIN_KEY.into();
    config.media.backoff_windows_ms = vec![[1, 2]];
    config
}

pub fn route_store(config: &ProxyConfig, durable: Arc<dyn DurableStore>) -> RouteStore {
    RouteStore::new(
        durable,
        Arc::new(MemoryEdgeCache::new()),
        RouteCache::new(),
        &config.route_store,
    )
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the proxy on an ephemeral port.
pub async fn start_proxy(config: ProxyConfig, fetcher: Option<Arc<dyn Fetcher>>) -> TestProxy {
    let routes = route_store(&config, Arc::new(MemoryDurableStore::new()));
    let live = Arc::new(ArcSwap::from_pointee(config));
    let mut state = AppState::new(live, routes, HttpFetcher::new().unwrap());
    if let Some(fetcher) = fetcher {
        state = state.with_fetcher(fetcher);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(state.clone());
    let wait = shutdown.wait();
    tokio::spawn(async move {
        let _ = server.run(listener, wait).await;
    });

    TestProxy {
        addr,
        state,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

/// Durable store with injectable failures and latency.
#[derive(Default)]
pub struct FlakyDurableStore {
    pub inner: MemoryDurableStore,
    pub fail_reads: AtomicBool,
    pub hang_reads: AtomicBool,
    pub reads: AtomicU32,
}

impl FlakyDurableStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn before_read(&self) -> StoreResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected read failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FlakyDurableStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.before_read().await?;
        self.inner.get(key).await
    }

    async fn get_with_metadata(&self, key: &str) -> StoreResult<Option<(String, Option<Value>)>> {
        self.before_read().await?;
        self.inner.get_with_metadata(key).await
    }

    async fn put(&self, key: &str, value: &str, metadata: Option<Value>) -> StoreResult<()> {
        self.inner.put(key, value, metadata).await
    }
}

/// Edge cache that counts traffic.
#[derive(Default)]
pub struct CountingEdgeCache {
    pub inner: MemoryEdgeCache,
    pub lookups: AtomicU32,
}

#[async_trait]
impl EdgeCache for CountingEdgeCache {
    async fn lookup(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(key).await
    }

    async fn put(&self, key: &str, blob: Bytes, max_age: Duration) -> StoreResult<()> {
        self.inner.put(key, blob, max_age).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }
}

/// Body chunk emitted after `delay`.
#[derive(Clone)]
pub struct Chunk {
    pub delay: Duration,
    pub bytes: Bytes,
}

pub fn chunk(delay_ms: u64, bytes: &'static [u8]) -> Chunk {
    Chunk {
        delay: Duration::from_millis(delay_ms),
        bytes: Bytes::from_static(bytes),
    }
}

/// One scripted upstream attempt.
#[derive(Clone)]
pub enum Step {
    /// Headers after `delay`, then the chunks; `hang` keeps the body open afterwards.
    Respond {
        delay: Duration,
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<Chunk>,
        hang: bool,
    },
    /// Never send headers.
    Hang,
    /// Transport failure.
    Fail(&'static str),
}

impl Step {
    pub fn status(status: u16) -> Self {
        Step::Respond {
            delay: Duration::ZERO,
            status,
            headers: Vec::new(),
            chunks: vec![chunk(0, b"body")],
            hang: false,
        }
    }

    pub fn media(content_type: &'static str, chunks: Vec<Chunk>, hang: bool) -> Self {
        Step::Respond {
            delay: Duration::ZERO,
            status: 200,
            headers: vec![("content-type", content_type)],
            chunks,
            hang,
        }
    }
}

/// Fetcher replaying a script, one step per call. Extra calls get `Step::status(200)`.
#[derive(Default)]
pub struct ScriptedFetcher {
    steps: Mutex<VecDeque<Step>>,
    pub calls: AtomicU32,
    pub cancels: Arc<AtomicU32>,
    pub seen: Mutex<Vec<UpstreamRequest>>,
}

impl ScriptedFetcher {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn scripted_body(chunks: Vec<Chunk>, hang: bool, cancel: CancellationToken) -> BodyStream {
    let emitted = stream::iter(chunks).then(|c| async move {
        tokio::time::sleep(c.delay).await;
        Ok::<Bytes, MediaError>(c.bytes)
    });
    let tail = stream::once(async move {
        if hang {
            std::future::pending::<()>().await;
        }
        None::<Result<Bytes, MediaError>>
    })
    .filter_map(|item| async move { item });
    emitted
        .chain(tail)
        .take_until(cancel.cancelled_owned())
        .boxed()
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: UpstreamRequest,
        cancel: CancellationToken,
    ) -> Result<UpstreamResponse, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request);

        let cancels = self.cancels.clone();
        let watch = cancel.clone();
        tokio::spawn(async move {
            watch.cancelled().await;
            cancels.fetch_add(1, Ordering::SeqCst);
        });

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::status(200));

        match step {
            Step::Hang => {
                cancel.cancelled().await;
                Err(MediaError::Transport("cancelled".into()))
            }
            Step::Fail(msg) => Err(MediaError::Transport(msg.into())),
            Step::Respond {
                delay,
                status,
                headers,
                chunks,
                hang,
            } => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MediaError::Transport("cancelled".into())),
                    _ = tokio::time::sleep(delay) => {}
                }
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.insert(name, HeaderValue::from_static(value));
                }
                Ok(UpstreamResponse {
                    status: StatusCode::from_u16(status).unwrap(),
                    headers: map,
                    body: scripted_body(chunks, hang, cancel),
                })
            }
        }
    }
}

/// Edge cache that always misses and whose writes never complete.
#[derive(Default)]
pub struct StuckEdgeCache {
    pub puts: AtomicU32,
}

#[async_trait]
impl EdgeCache for StuckEdgeCache {
    async fn lookup(&self, _key: &str) -> StoreResult<Option<Bytes>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _blob: Bytes, _max_age: Duration) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> StoreResult<()> {
        Ok(())
    }
}
