//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the edge proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Default upstream and non-media fetch limits.
    pub upstream: UpstreamConfig,

    /// Tiered route configuration store.
    pub route_store: RouteStoreConfig,

    /// Media delivery policy.
    pub media: MediaConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream used when no route mapping matches, plus non-media fetch limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Fallback origin (e.g., "https://media.example.com").
    pub default_url: String,

    /// Headers deadline for ordinary API calls in milliseconds.
    pub api_timeout_ms: u64,

    /// Headers deadline for playlists and playback-info calls in milliseconds.
    pub critical_timeout_ms: u64,

    /// Largest request body buffered for forwarding.
    pub max_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_url: "https://media.example.com".to_string(),
            api_timeout_ms: 6_000,
            critical_timeout_ms: 9_000,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Storage backend for the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

/// Route configuration store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteStoreConfig {
    pub backend: StoreBackend,

    /// Directory for the file backend.
    pub data_dir: Option<PathBuf>,

    /// In-process cache lifetime in seconds.
    pub l1_ttl_secs: u64,

    /// Edge cache age after which a background refresh is triggered.
    pub l2_soft_ttl_secs: u64,

    /// Edge cache storage cap.
    pub l2_hard_ttl_secs: u64,

    /// Host used to namespace edge cache keys.
    pub cache_host: String,

    /// Window in which concurrent refreshes are coalesced.
    pub refresh_dedup_secs: u64,

    /// Lifetime of the cached "no configuration" result.
    pub empty_ttl_secs: u64,

    /// Attempts per durable store read.
    pub read_attempts: u32,

    /// Linear backoff step between durable store read attempts.
    pub read_backoff_ms: u64,

    /// Deadline for a single adapter call.
    pub op_timeout_ms: u64,

    /// Offset applied to document timestamps (seconds east of UTC).
    pub timestamp_utc_offset_secs: i32,
}

impl Default for RouteStoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            data_dir: None,
            l1_ttl_secs: 60,
            l2_soft_ttl_secs: 60,
            l2_hard_ttl_secs: 30 * 24 * 3600,
            cache_host: "route-cache.local".to_string(),
            refresh_dedup_secs: 5,
            empty_ttl_secs: 10,
            read_attempts: 3,
            read_backoff_ms: 50,
            op_timeout_ms: 2_000,
            timestamp_utc_offset_secs: 8 * 3600,
        }
    }
}

impl RouteStoreConfig {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs)
    }

    pub fn l2_soft_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_soft_ttl_secs)
    }

    pub fn l2_hard_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_hard_ttl_secs)
    }

    pub fn refresh_dedup(&self) -> Duration {
        Duration::from_secs(self.refresh_dedup_secs)
    }

    pub fn empty_ttl(&self) -> Duration {
        Duration::from_secs(self.empty_ttl_secs)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Media delivery policy as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ttfb_timeout_ms: u64,
    pub max_retries: u32,
    pub first_body_timeout_ms: u64,
    pub idle_timeout_ms: u64,

    /// Bytes that must arrive before the idle watchdog is re-armed.
    pub progress_threshold_bytes: u64,

    /// Jitter windows `[min_ms, max_ms]` indexed by retry number; the last one repeats.
    pub backoff_windows_ms: Vec<[u64; 2]>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ttfb_timeout_ms: 15_000,
            max_retries: 1,
            first_body_timeout_ms: 5_000,
            idle_timeout_ms: 12_000,
            progress_threshold_bytes: 16 * 1024,
            backoff_windows_ms: vec![[200, 400], [400, 800]],
        }
    }
}

/// Timeout configuration for locally served endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for an admin request in seconds.
    pub admin_request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            admin_request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Always emit `X-Proxy-*` diagnostics on media responses.
    pub debug_headers: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            debug_headers: false,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/manage/api` routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

/// Placeholder key rejected by validation while the admin API is enabled.
pub const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: PLACEHOLDER_ADMIN_KEY.to_string(),
        }
    }
}
