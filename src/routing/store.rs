//! Three-tier, versioned route configuration store.
//!
//! # Responsibilities
//! - Serve the routing table fastest-first: L1 → L2 → durable store
//! - Degrade to stale or empty data instead of failing reads
//! - Publish and roll back with optimistic concurrency on the pointer
//!
//! # Design Decisions
//! - Documents are immutable; only the pointer is ever overwritten
//! - Every adapter call is bounded by `op_timeout`, every read loop by `read_attempts`
//! - L2 writes are best-effort; the durable store is authoritative
//! - Publishes and rollbacks inside one process are serialized; across
//!   processes a lost race surfaces as `VersionConflict`

use chrono::{FixedOffset, Offset, Utc};
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::cache::RouteCache;
use super::edge::EdgeTier;
use super::refresh::{RefreshGate, RefreshHandle, RefreshOutcome};
use super::types::{LoadedRoutes, Mappings, RouteDocument, RoutePointer, RouteSource};
use crate::config::RouteStoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::kv::{DurableStore, EdgeCache};
use crate::observability::metrics;
use crate::resilience::backoff::linear_backoff;
use crate::resilience::retries::retry;
use crate::resilience::timeouts::with_op_timeout;

pub const POINTER_KEY: &str = "routes:current";

pub fn document_key(version: &str) -> String {
    format!("routes:{}", version)
}

#[derive(Clone)]
pub struct RouteStore {
    inner: Arc<Inner>,
}

struct Inner {
    durable: Arc<dyn DurableStore>,
    edge: EdgeTier,
    l1: RouteCache,
    refresh: Arc<RefreshGate>,
    write_lock: Mutex<()>,
    settings: RouteStoreConfig,
    offset: FixedOffset,
}

impl RouteStore {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        edge: Arc<dyn EdgeCache>,
        l1: RouteCache,
        settings: &RouteStoreConfig,
    ) -> Self {
        let edge = EdgeTier::new(
            edge,
            settings.cache_host.clone(),
            settings.l2_soft_ttl(),
            settings.l2_hard_ttl(),
            settings.empty_ttl(),
            settings.op_timeout(),
        );
        let offset = FixedOffset::east_opt(settings.timestamp_utc_offset_secs)
            .unwrap_or_else(|| Utc.fix());

        Self {
            inner: Arc::new(Inner {
                durable,
                edge,
                l1,
                refresh: RefreshGate::new(settings.refresh_dedup()),
                write_lock: Mutex::new(()),
                settings: settings.clone(),
                offset,
            }),
        }
    }

    /// Current routing table. Never fails; degrades to stale or empty data.
    pub async fn load(&self) -> LoadedRoutes {
        let loaded = self.load_inner().await;
        metrics::record_route_load(loaded.source.as_str());
        loaded
    }

    async fn load_inner(&self) -> LoadedRoutes {
        let inner = &self.inner;

        if let Some(entry) = inner.l1.fresh(Instant::now()) {
            return LoadedRoutes {
                version: entry.version.clone(),
                mappings: Arc::clone(&entry.mappings),
                source: RouteSource::L1,
                kv_read_ms: 0,
            };
        }

        if let Some(ptr) = inner.edge.read_pointer().await {
            if let Some(hit) = inner.edge.read_document(&ptr.value).await {
                let doc = hit.value;
                let mappings = Arc::new(doc.mappings);
                inner.l1.store(
                    Some(doc.version.clone()),
                    Arc::clone(&mappings),
                    inner.settings.l1_ttl(),
                );
                if ptr.stale || hit.stale {
                    tracing::debug!(version = %doc.version, "Edge route cache past soft TTL, refreshing");
                    let _ = self.refresh();
                }
                return LoadedRoutes {
                    version: Some(doc.version),
                    mappings,
                    source: RouteSource::L2,
                    kv_read_ms: 0,
                };
            }
        }

        let started = Instant::now();
        let result = inner.read_current().await;
        let kv_read_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Some(doc)) => {
                let tier = Arc::clone(inner);
                let cached = doc.clone();
                tokio::spawn(async move { tier.edge.write_through(&cached).await });
                let mappings = Arc::new(doc.mappings);
                inner.l1.store(
                    Some(doc.version.clone()),
                    Arc::clone(&mappings),
                    inner.settings.l1_ttl(),
                );
                LoadedRoutes {
                    version: Some(doc.version),
                    mappings,
                    source: RouteSource::Kv,
                    kv_read_ms,
                }
            }
            Ok(None) => {
                inner.store_empty();
                let cleanup = Arc::clone(inner);
                tokio::spawn(async move { cleanup.edge.clear().await });
                LoadedRoutes::empty(RouteSource::Empty, kv_read_ms)
            }
            Err(e) => {
                if let Some(entry) = inner.l1.last_known() {
                    tracing::warn!(
                        version = ?entry.version,
                        error = %e,
                        "Durable store unavailable, serving stale routes"
                    );
                    LoadedRoutes {
                        version: entry.version.clone(),
                        mappings: Arc::clone(&entry.mappings),
                        source: RouteSource::Stale,
                        kv_read_ms,
                    }
                } else {
                    tracing::error!(
                        error = %e,
                        "Durable store unavailable and no cached routes, serving empty mappings"
                    );
                    LoadedRoutes::empty(RouteSource::Empty, kv_read_ms)
                }
            }
        }
    }

    /// Refresh L1/L2 from the durable store, joining any refresh in flight.
    pub fn refresh(&self) -> RefreshHandle {
        let inner = Arc::clone(&self.inner);
        self.inner
            .refresh
            .trigger(move || async move { inner.refresh_from_durable().await }.boxed())
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.inner.refresh.in_flight()
    }

    /// Publish `mappings` as a new version if the pointer still equals `expected`.
    pub async fn publish(
        &self,
        editor: &str,
        mappings: Mappings,
        expected: Option<&str>,
    ) -> StoreResult<String> {
        let inner = &self.inner;
        let _guard = inner.write_lock.lock().await;

        let ptr = inner.read_pointer().await?;
        let expected = expected.filter(|v| !v.is_empty());
        if expected != ptr.version.as_deref() {
            metrics::record_route_publish("conflict");
            tracing::info!(
                expected = ?expected,
                current = ?ptr.version,
                editor,
                "Rejected route publish on version conflict"
            );
            return Err(StoreError::VersionConflict {
                expected: expected.map(str::to_owned),
                current: ptr.version,
            });
        }

        let version = next_version(ptr.version.as_deref(), Utc::now().timestamp_millis());
        let doc = RouteDocument {
            version: version.clone(),
            timestamp: inner.timestamp(),
            editor: if editor.is_empty() { "unknown" } else { editor }.to_string(),
            prev: ptr.version.clone(),
            mappings,
        };

        let raw = serde_json::to_string(&doc)?;
        if let Err(e) = inner.put(&document_key(&version), &raw, None).await {
            metrics::record_route_publish("error");
            return Err(e);
        }
        if let Err(e) = inner
            .put(POINTER_KEY, &version, Some(json!({ "prev": ptr.version })))
            .await
        {
            metrics::record_route_publish("error");
            return Err(e);
        }

        inner.activate(doc).await;
        metrics::record_route_publish("published");
        tracing::info!(version = %version, prev = ?ptr.version, editor, "Published route configuration");
        Ok(version)
    }

    /// Point at an existing version: `target`, or the pointer's recorded previous.
    pub async fn rollback(&self, target: Option<&str>) -> StoreResult<String> {
        let inner = &self.inner;
        let _guard = inner.write_lock.lock().await;

        let ptr = inner.read_pointer().await?;
        let to = target
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .or_else(|| ptr.prev.clone())
            .ok_or(StoreError::NoPreviousVersion)?;

        let raw = with_op_timeout(
            inner.settings.op_timeout(),
            inner.durable.get(&document_key(&to)),
        )
        .await?
        .ok_or_else(|| StoreError::NotFound(to.clone()))?;
        let doc: RouteDocument = serde_json::from_str(&raw)?;

        if let Err(e) = inner
            .put(POINTER_KEY, &to, Some(json!({ "prev": ptr.version })))
            .await
        {
            metrics::record_route_publish("error");
            return Err(e);
        }

        let version = doc.version.clone();
        inner.activate(doc).await;
        metrics::record_route_publish("rolled_back");
        tracing::info!(version = %version, from = ?ptr.version, "Rolled back route configuration");
        Ok(version)
    }

    /// Current document straight from the durable store.
    pub async fn export(&self) -> StoreResult<Option<RouteDocument>> {
        let ptr = self.inner.read_pointer().await?;
        let Some(version) = ptr.version else {
            return Ok(None);
        };
        match self.inner.read_document(&version, 2).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) => {
                tracing::warn!(version = %version, error = %e, "Export could not read current document");
                Ok(None)
            }
        }
    }

    /// Up to `limit` documents, newest first, following `prev` links.
    pub async fn history(&self, limit: usize) -> StoreResult<Vec<RouteDocument>> {
        let inner = &self.inner;
        let ptr = inner.read_pointer().await?;
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut next = ptr.version;

        while let Some(version) = next {
            if out.len() >= limit || !seen.insert(version.clone()) {
                break;
            }
            let raw = with_op_timeout(
                inner.settings.op_timeout(),
                inner.durable.get(&document_key(&version)),
            )
            .await?;
            let Some(raw) = raw else {
                tracing::warn!(version = %version, "History chain ends at missing document");
                break;
            };
            let doc: RouteDocument = serde_json::from_str(&raw)?;
            next = doc.prev.clone();
            out.push(doc);
        }
        Ok(out)
    }

    /// Pointer as stored, for diagnostics and the admin surface.
    pub async fn pointer(&self) -> StoreResult<RoutePointer> {
        self.inner.read_pointer().await
    }
}

impl Inner {
    async fn read_pointer(&self) -> StoreResult<RoutePointer> {
        let durable = &self.durable;
        let timeout = self.settings.op_timeout();
        let step = self.settings.read_backoff();

        retry(
            "route pointer read",
            self.settings.read_attempts,
            |attempt| linear_backoff(attempt, step),
            |_: &StoreError| true,
            |_| async move {
                let raw = with_op_timeout(timeout, durable.get_with_metadata(POINTER_KEY)).await?;
                Ok(match raw {
                    Some((version, metadata)) if !version.is_empty() => RoutePointer {
                        version: Some(version),
                        prev: metadata.as_ref().and_then(prev_from_metadata),
                    },
                    _ => RoutePointer::default(),
                })
            },
        )
        .await
        .map_err(|e| StoreError::SourceUnavailable(e.to_string()))
    }

    /// Document for `version`. A missing document is retried too, since the
    /// pointer may be visible before the document it references.
    async fn read_document(&self, version: &str, attempts: u32) -> StoreResult<RouteDocument> {
        let durable = &self.durable;
        let timeout = self.settings.op_timeout();
        let step = self.settings.read_backoff();
        let key = document_key(version);
        let key = key.as_str();

        retry(
            "route document read",
            attempts,
            |attempt| linear_backoff(attempt, step),
            |e: &StoreError| !matches!(e, StoreError::Serialization(_)),
            |_| async move {
                match with_op_timeout(timeout, durable.get(key)).await? {
                    Some(raw) => Ok(serde_json::from_str::<RouteDocument>(&raw)?),
                    None => Err(StoreError::NotFound(key.to_string())),
                }
            },
        )
        .await
    }

    /// Pointer then document. `None` when no configuration exists.
    async fn read_current(&self) -> StoreResult<Option<RouteDocument>> {
        let ptr = self.read_pointer().await?;
        match ptr.version {
            Some(version) => Ok(Some(
                self.read_document(&version, self.settings.read_attempts)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    async fn refresh_from_durable(self: Arc<Self>) -> RefreshOutcome {
        let outcome = match self.read_current().await {
            Ok(Some(doc)) => {
                let version = doc.version.clone();
                self.edge.write_through(&doc).await;
                self.l1.store(
                    Some(doc.version),
                    Arc::new(doc.mappings),
                    self.settings.l1_ttl(),
                );
                RefreshOutcome::Updated(version)
            }
            Ok(None) => {
                self.store_empty();
                self.edge.clear().await;
                RefreshOutcome::Empty
            }
            Err(e) => {
                tracing::warn!(error = %e, "Background route refresh failed");
                RefreshOutcome::Failed(e.to_string())
            }
        };
        metrics::record_route_refresh(outcome.as_str());
        outcome
    }

    fn store_empty(&self) {
        self.l1
            .store(None, Arc::new(Mappings::new()), self.settings.empty_ttl());
    }

    /// Make `doc` current in L1 and L2 after the pointer moved to it.
    async fn activate(&self, doc: RouteDocument) {
        self.l1.store(
            Some(doc.version.clone()),
            Arc::new(doc.mappings.clone()),
            self.settings.l1_ttl(),
        );
        self.edge.write_through(&doc).await;
    }

    async fn put(&self, key: &str, value: &str, metadata: Option<Value>) -> StoreResult<()> {
        with_op_timeout(
            self.settings.op_timeout(),
            self.durable.put(key, value, metadata),
        )
        .await
    }

    fn timestamp(&self) -> String {
        Utc::now()
            .with_timezone(&self.offset)
            .format("%Y-%m-%dT%H:%M:%S%:z")
            .to_string()
    }
}

fn prev_from_metadata(metadata: &Value) -> Option<String> {
    metadata
        .get("prev")
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// `v<epoch-ms>`, forced past the current version so ids stay ordered even
/// when two publishes land in the same millisecond or the clock steps back.
fn next_version(current: Option<&str>, now_ms: i64) -> String {
    let floor = current
        .and_then(|v| v.strip_prefix('v'))
        .and_then(|n| n.parse::<i64>().ok())
        .map(|n| n.saturating_add(1))
        .unwrap_or(i64::MIN);
    format!("v{}", now_ms.max(floor))
}
