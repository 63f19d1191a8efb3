//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc<ArcSwap<ProxyConfig>> to request handlers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the live ProxyConfig
//!     → next request observes new media policy / upstream defaults
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Route mappings are NOT part of this file: they live in the route store

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, ListenerConfig, LogFormat, MediaConfig, ObservabilityConfig, ProxyConfig,
    RouteStoreConfig, StoreBackend, TimeoutConfig, UpstreamConfig,
};
