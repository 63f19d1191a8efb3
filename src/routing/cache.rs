//! Process-local L1 route cache.
//!
//! Created once at startup and handed to the `RouteStore`. Readers never
//! block: the current entry is swapped atomically and last writer wins.

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::types::Mappings;

#[derive(Debug)]
pub struct L1Entry {
    pub version: Option<String>,
    pub mappings: Arc<Mappings>,
    pub expires_at: Instant,
}

impl L1Entry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteCache {
    slot: Arc<ArcSwapOption<L1Entry>>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry if present and not yet expired.
    pub fn fresh(&self, now: Instant) -> Option<Arc<L1Entry>> {
        self.slot.load_full().filter(|e| e.is_fresh(now))
    }

    /// Entry regardless of expiry, for degraded reads.
    pub fn last_known(&self) -> Option<Arc<L1Entry>> {
        self.slot.load_full()
    }

    pub fn store(&self, version: Option<String>, mappings: Arc<Mappings>, ttl: Duration) {
        self.slot.store(Some(Arc::new(L1Entry {
            version,
            mappings,
            expires_at: Instant::now() + ttl,
        })));
    }

    /// Mark the current entry expired without discarding it.
    pub fn expire(&self) {
        if let Some(entry) = self.slot.load_full() {
            self.slot.store(Some(Arc::new(L1Entry {
                version: entry.version.clone(),
                mappings: Arc::clone(&entry.mappings),
                expires_at: Instant::now(),
            })));
        }
    }
}
