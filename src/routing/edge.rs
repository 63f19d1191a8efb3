//! L2 tier: route blobs in the shared edge cache.
//!
//! Blobs carry their own `cachedAt` (epoch ms) so every process judges
//! soft-TTL staleness the same way. The cache's own expiry is the hard TTL
//! and only caps storage. Failures here are logged and treated as misses.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::types::RouteDocument;
use crate::error::StoreResult;
use crate::kv::EdgeCache;
use crate::resilience::timeouts::with_op_timeout;

#[derive(Debug, Serialize, Deserialize)]
struct PointerBlob {
    version: Option<String>,
    #[serde(rename = "cachedAt", default)]
    cached_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DocumentBlob {
    #[serde(flatten)]
    doc: RouteDocument,
    #[serde(rename = "cachedAt", default)]
    cached_at: i64,
}

/// A value read from L2 plus whether it is past the soft TTL.
#[derive(Debug, Clone)]
pub struct EdgeHit<T> {
    pub value: T,
    pub stale: bool,
}

#[derive(Clone)]
pub struct EdgeTier {
    cache: Arc<dyn EdgeCache>,
    host: String,
    soft_ttl: Duration,
    hard_ttl: Duration,
    empty_ttl: Duration,
    op_timeout: Duration,
}

pub fn pointer_key(host: &str) -> String {
    format!("https://{}/__route_pointer", host)
}

pub fn document_key(host: &str, version: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(version.as_bytes()).collect();
    format!("https://{}/__route_config?v={}", host, encoded)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl EdgeTier {
    pub fn new(
        cache: Arc<dyn EdgeCache>,
        host: impl Into<String>,
        soft_ttl: Duration,
        hard_ttl: Duration,
        empty_ttl: Duration,
        op_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            host: host.into(),
            soft_ttl,
            hard_ttl,
            empty_ttl,
            op_timeout,
        }
    }

    fn is_stale(&self, cached_at: i64) -> bool {
        now_ms().saturating_sub(cached_at) > self.soft_ttl.as_millis() as i64
    }

    async fn lookup(&self, key: &str) -> StoreResult<Option<Bytes>> {
        with_op_timeout(self.op_timeout, self.cache.lookup(key)).await
    }

    async fn put(&self, key: &str, blob: Vec<u8>, max_age: Duration) -> StoreResult<()> {
        with_op_timeout(self.op_timeout, self.cache.put(key, Bytes::from(blob), max_age)).await
    }

    /// Cached current version. An explicit empty pointer reads as a miss.
    pub async fn read_pointer(&self) -> Option<EdgeHit<String>> {
        let raw = match self.lookup(&pointer_key(&self.host)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "Edge cache pointer read failed");
                return None;
            }
        };
        let blob: PointerBlob = serde_json::from_slice(&raw).ok()?;
        let version = blob.version.filter(|v| !v.is_empty())?;
        Some(EdgeHit {
            value: version,
            stale: self.is_stale(blob.cached_at),
        })
    }

    pub async fn read_document(&self, version: &str) -> Option<EdgeHit<RouteDocument>> {
        let raw = match self.lookup(&document_key(&self.host, version)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(version, error = %e, "Edge cache document read failed");
                return None;
            }
        };
        let blob: DocumentBlob = serde_json::from_slice(&raw).ok()?;
        Some(EdgeHit {
            stale: self.is_stale(blob.cached_at),
            value: blob.doc,
        })
    }

    pub async fn write_pointer(&self, version: &str) {
        let blob = PointerBlob {
            version: Some(version.to_string()),
            cached_at: now_ms(),
        };
        let result = match serde_json::to_vec(&blob) {
            Ok(raw) => self.put(&pointer_key(&self.host), raw, self.hard_ttl).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(version, error = %e, "Edge cache pointer write failed");
        }
    }

    pub async fn write_document(&self, doc: &RouteDocument) {
        let blob = DocumentBlob {
            doc: doc.clone(),
            cached_at: now_ms(),
        };
        let result = match serde_json::to_vec(&blob) {
            Ok(raw) => {
                self.put(&document_key(&self.host, &doc.version), raw, self.hard_ttl)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(version = %doc.version, error = %e, "Edge cache document write failed");
        }
    }

    /// Write pointer and document together.
    pub async fn write_through(&self, doc: &RouteDocument) {
        self.write_pointer(&doc.version).await;
        self.write_document(doc).await;
    }

    /// Replace the pointer with a short-lived empty one and drop the document
    /// the old pointer referenced. Other cached versions are left alone.
    pub async fn clear(&self) {
        let previous = self.read_pointer().await.map(|hit| hit.value);

        let empty = PointerBlob {
            version: None,
            cached_at: now_ms(),
        };
        let result = match serde_json::to_vec(&empty) {
            Ok(raw) => self.put(&pointer_key(&self.host), raw, self.empty_ttl).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Edge cache pointer clear failed");
            return;
        }

        if let Some(version) = previous {
            let key = document_key(&self.host, &version);
            if let Err(e) = with_op_timeout(self.op_timeout, self.cache.delete(&key)).await {
                tracing::warn!(version = %version, error = %e, "Edge cache document delete failed");
            } else {
                tracing::debug!(version = %version, "Dropped cached route document");
            }
        }
    }
}
