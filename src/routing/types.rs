//! Route configuration data model.
//!
//! Field names on the wire follow the persisted layout (`pathPrefix`, `ts`,
//! `prev`) so documents written by other edge processes stay readable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where one subdomain is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMapping {
    /// Base URL of the upstream.
    pub upstream: String,

    #[serde(rename = "pathPrefix", default)]
    pub path_prefix: String,
}

impl RouteMapping {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            path_prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }
}

/// Subdomain → mapping. Ordered so exports and documents are stable.
pub type Mappings = BTreeMap<String, RouteMapping>;

/// Immutable, versioned snapshot of the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDocument {
    pub version: String,

    #[serde(rename = "ts", default)]
    pub timestamp: String,

    #[serde(default)]
    pub editor: String,

    /// Version that was current when this one was published.
    #[serde(default)]
    pub prev: Option<String>,

    #[serde(default)]
    pub mappings: Mappings,
}

/// The single mutable cell in the durable store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePointer {
    pub version: Option<String>,
    pub prev: Option<String>,
}

/// Tier that satisfied a `load()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    L1,
    L2,
    Kv,
    /// Durable store failed; last known L1 value served past its TTL.
    Stale,
    /// No configuration exists, or nothing could be read at all.
    Empty,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSource::L1 => "L1",
            RouteSource::L2 => "L2",
            RouteSource::Kv => "KV",
            RouteSource::Stale => "STALE",
            RouteSource::Empty => "EMPTY",
        }
    }
}

/// Result of `RouteStore::load`.
#[derive(Debug, Clone)]
pub struct LoadedRoutes {
    pub version: Option<String>,
    pub mappings: Arc<Mappings>,
    pub source: RouteSource,
    /// Time spent reading the durable store, zero for cache hits.
    pub kv_read_ms: u64,
}

impl LoadedRoutes {
    pub fn empty(source: RouteSource, kv_read_ms: u64) -> Self {
        Self {
            version: None,
            mappings: Arc::new(Mappings::new()),
            source,
            kv_read_ms,
        }
    }
}
