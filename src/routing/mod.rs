//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → matcher.rs (classify: upgrade / media / critical / api)
//!     → store.rs   (load routing table: L1 → L2 → durable store)
//!     → router.rs  (subdomain → mapping → upstream target URL)
//!
//! Admin mutation:
//!     publish / rollback
//!     → store.rs (check pointer, write document, move pointer)
//!     → L1 updated synchronously, L2 written best-effort
//! ```
//!
//! # Design Decisions
//! - Routing table lives in the store, not the config file
//! - No regex in hot path (prefix/substring matching only)
//! - Reads degrade instead of failing; writes detect and reject conflicts

pub mod cache;
pub mod edge;
pub mod matcher;
pub mod refresh;
pub mod router;
pub mod store;
pub mod types;

pub use cache::RouteCache;
pub use matcher::RequestKind;
pub use store::RouteStore;
pub use types::{LoadedRoutes, Mappings, RouteDocument, RouteMapping, RouteSource};
