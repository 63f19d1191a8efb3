//! Storage adapters behind the route configuration store.
//!
//! # Data Flow
//! ```text
//! RouteStore
//!     → EdgeCache   (L2, shared best-effort blob cache, may drop entries)
//!     → DurableStore (L3, eventually consistent source of truth)
//! ```
//!
//! # Design Decisions
//! - Both adapters are trait objects so deployments can swap backends
//! - Adapters report failures; retries and deadlines live in the caller
//! - Values are opaque strings/blobs; the route store owns the encoding

pub mod file;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;

use crate::error::StoreResult;

/// Key/value source of truth. Values carry optional JSON metadata.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn get_with_metadata(&self, key: &str) -> StoreResult<Option<(String, Option<Value>)>>;

    /// Overwrite `key` atomically with `value` and `metadata`.
    async fn put(&self, key: &str, value: &str, metadata: Option<Value>) -> StoreResult<()>;
}

/// Shared blob cache. Entries may disappear at any time.
#[async_trait]
pub trait EdgeCache: Send + Sync {
    async fn lookup(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Store `blob` for at most `max_age`.
    async fn put(&self, key: &str, blob: Bytes, max_age: Duration) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}
