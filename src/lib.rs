//! Edge media proxy library.
//!
//! Routes requests by subdomain through a versioned, tiered route
//! configuration store and delivers media with bounded retries and
//! supervised streaming.

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod kv;
pub mod lifecycle;
pub mod media;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
