//! Single-flight background refresh.
//!
//! At most one refresh from the durable store runs per process. Callers that
//! ask for a refresh while one is in flight get a handle to the same shared
//! future. The refresh runs on its own task so it finishes even when every
//! caller has moved on.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How a refresh ended. Cloned to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// L1 and L2 now hold this version.
    Updated(String),
    /// The durable store has no configuration.
    Empty,
    Failed(String),
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Updated(_) => "updated",
            RefreshOutcome::Empty => "empty",
            RefreshOutcome::Failed(_) => "failed",
        }
    }
}

pub type RefreshHandle = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    generation: u64,
    started_at: Instant,
    handle: RefreshHandle,
}

#[derive(Default)]
struct Slot {
    current: Option<InFlight>,
    next_generation: u64,
}

pub struct RefreshGate {
    slot: Mutex<Slot>,
    dedup_window: Duration,
}

impl RefreshGate {
    pub fn new(dedup_window: Duration) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::default()),
            dedup_window,
        })
    }

    /// Join the in-flight refresh or start one built by `start`.
    ///
    /// A refresh that outlives the dedup window is still joined rather than
    /// duplicated; its own retry budget bounds how long that can last.
    pub fn trigger<F>(self: &Arc<Self>, start: F) -> RefreshHandle
    where
        F: FnOnce() -> BoxFuture<'static, RefreshOutcome>,
    {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(in_flight) = &slot.current {
            let age = in_flight.started_at.elapsed();
            if age >= self.dedup_window {
                tracing::warn!(
                    age_ms = age.as_millis() as u64,
                    "Route refresh outlived dedup window, joining it"
                );
            }
            return in_flight.handle.clone();
        }

        let generation = slot.next_generation;
        slot.next_generation += 1;
        let handle = start().shared();
        slot.current = Some(InFlight {
            generation,
            started_at: Instant::now(),
            handle: handle.clone(),
        });
        drop(slot);

        let gate = Arc::clone(self);
        let driver = handle.clone();
        tokio::spawn(async move {
            let outcome = driver.await;
            tracing::debug!(outcome = outcome.as_str(), "Route refresh finished");
            gate.finish(generation);
        });

        handle
    }

    fn finish(&self, generation: u64) {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.current.as_ref().map(|f| f.generation) == Some(generation) {
            slot.current = None;
        }
    }

    pub fn in_flight(&self) -> bool {
        match self.slot.lock() {
            Ok(guard) => guard.current.is_some(),
            Err(poisoned) => poisoned.into_inner().current.is_some(),
        }
    }
}
