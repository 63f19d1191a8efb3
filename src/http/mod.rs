//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → /manage/api/* → admin API
//!     → everything else → proxy handler
//!         → request.rs (host, target URL, upstream headers, bounded body)
//!         → media engine | websocket.rs tunnel | single bounded fetch
//!         → response.rs (normalize headers, redirects, gateway errors)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use server::{AppState, HttpServer};
