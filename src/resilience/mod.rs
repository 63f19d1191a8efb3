//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to origin / durable store / edge cache:
//!     → timeouts.rs (enforce headers deadline or per-operation deadline)
//!     → On failure: retries.rs (check if retryable, retry with backoff)
//!     → backoff.rs (linear steps for store reads, jittered windows for media)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for idempotent requests (GET, HEAD)
//! - Attempt budgets are small and fixed; degraded data beats waiting

pub mod backoff;
pub mod retries;
pub mod timeouts;
