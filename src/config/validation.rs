//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, retry caps, TTL ordering)
//! - Check that URLs and addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{ProxyConfig, StoreBackend, PLACEHOLDER_ADMIN_KEY};

/// Hard cap on media retries; each retry re-downloads from byte zero.
pub const MAX_MEDIA_RETRIES: u32 = 5;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    match url::Url::parse(&config.upstream.default_url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
        Ok(u) => errors.push(ValidationError::new(
            "upstream.default_url",
            format!("unsupported scheme '{}'", u.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("upstream.default_url", e.to_string())),
    }
    if config.upstream.api_timeout_ms == 0 {
        errors.push(ValidationError::new("upstream.api_timeout_ms", "must be > 0"));
    }
    if config.upstream.critical_timeout_ms == 0 {
        errors.push(ValidationError::new("upstream.critical_timeout_ms", "must be > 0"));
    }

    let store = &config.route_store;
    if store.backend == StoreBackend::File && store.data_dir.is_none() {
        errors.push(ValidationError::new(
            "route_store.data_dir",
            "required when backend = \"file\"",
        ));
    }
    if store.read_attempts == 0 {
        errors.push(ValidationError::new("route_store.read_attempts", "must be >= 1"));
    }
    if store.op_timeout_ms == 0 {
        errors.push(ValidationError::new("route_store.op_timeout_ms", "must be > 0"));
    }
    if store.l2_soft_ttl_secs > store.l2_hard_ttl_secs {
        errors.push(ValidationError::new(
            "route_store.l2_soft_ttl_secs",
            "must not exceed l2_hard_ttl_secs",
        ));
    }
    if store.cache_host.trim().is_empty() {
        errors.push(ValidationError::new("route_store.cache_host", "must not be empty"));
    }

    let media = &config.media;
    for (field, value) in [
        ("media.ttfb_timeout_ms", media.ttfb_timeout_ms),
        ("media.first_body_timeout_ms", media.first_body_timeout_ms),
        ("media.idle_timeout_ms", media.idle_timeout_ms),
        ("media.progress_threshold_bytes", media.progress_threshold_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if media.max_retries > MAX_MEDIA_RETRIES {
        errors.push(ValidationError::new(
            "media.max_retries",
            format!("must be <= {}", MAX_MEDIA_RETRIES),
        ));
    }
    if media.backoff_windows_ms.is_empty() {
        errors.push(ValidationError::new("media.backoff_windows_ms", "must not be empty"));
    }
    if media.backoff_windows_ms.iter().any(|[min, max]| min > max) {
        errors.push(ValidationError::new(
            "media.backoff_windows_ms",
            "each window needs min <= max",
        ));
    }

    if config.admin.enabled
        && (config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_ADMIN_KEY)
    {
        errors.push(ValidationError::new(
            "admin.api_key",
            "set a real key or disable the admin API",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
