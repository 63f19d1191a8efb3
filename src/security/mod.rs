//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request leg:
//!     → headers.rs (scrub client identity, strip hop-by-hop)
//!     → forwarded upstream
//!
//! Response leg:
//!     → headers.rs (strip hop-by-hop unless 101, relax origin policies)
//!     → returned to client
//! ```
//!
//! # Design Decisions
//! - Header rules are pure functions over `HeaderMap`
//! - No trust in client input: identity headers never reach the origin

pub mod headers;
