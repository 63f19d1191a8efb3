//! In-memory adapters.
//!
//! Used for single-process deployments and throughout the tests.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use super::{DurableStore, EdgeCache};
use crate::error::StoreResult;

#[derive(Debug, Clone)]
struct Record {
    value: String,
    metadata: Option<Value>,
}

/// `DurableStore` held in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    records: DashMap<String, Record>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keys currently stored, unordered.
    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    pub fn remove(&self, key: &str) {
        self.records.remove(key);
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.records.get(key).map(|r| r.value.clone()))
    }

    async fn get_with_metadata(&self, key: &str) -> StoreResult<Option<(String, Option<Value>)>> {
        Ok(self
            .records
            .get(key)
            .map(|r| (r.value.clone(), r.metadata.clone())))
    }

    async fn put(&self, key: &str, value: &str, metadata: Option<Value>) -> StoreResult<()> {
        self.records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                metadata,
            },
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedBlob {
    blob: Bytes,
    expires_at: Instant,
}

/// `EdgeCache` held in a concurrent map. `max_age` is enforced on lookup.
#[derive(Debug, Default)]
pub struct MemoryEdgeCache {
    entries: DashMap<String, CachedBlob>,
}

impl MemoryEdgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl EdgeCache for MemoryEdgeCache {
    async fn lookup(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.blob.clone())),
            Some(_) => true,
            None => false,
        };
        if hit {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, blob: Bytes, max_age: Duration) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            CachedBlob {
                blob,
                expires_at: Instant::now() + max_age,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}
