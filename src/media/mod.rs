//! Media delivery subsystem.
//!
//! # Data Flow
//! ```text
//! Video / ranged request
//!     → engine.rs (attempt loop: TTFB deadline, 5xx/transport retries)
//!     → fetch.rs (raw upstream call, cancellable)
//!     → classify.rs (bypass or wrap)
//!     → supervised.rs (first-body deadline, idle watchdog, teardown)
//!     → streamed to the client
//! ```
//!
//! # Design Decisions
//! - Body bytes are never buffered; streams are forwarded chunk by chunk
//! - Supervision only where it pays; large media transfers bypass it
//! - Timeouts map to 504, other transport failures to 502

pub mod classify;
pub mod engine;
pub mod fetch;
pub mod policy;
pub mod supervised;

pub use engine::{MediaEngine, MediaResponse, StreamMode};
pub use fetch::{BodyStream, Fetcher, HttpFetcher, UpstreamRequest, UpstreamResponse};
pub use policy::MediaPolicy;
pub use supervised::{SupervisedStream, TeardownHandle, TeardownReason};
