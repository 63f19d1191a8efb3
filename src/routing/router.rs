//! Upstream selection.
//!
//! # Responsibilities
//! - Derive the subdomain from the request host
//! - Pick a mapping: exact subdomain, then `default`, then the configured fallback
//! - Build the upstream target URL
//!
//! # Design Decisions
//! - Pure functions over an already loaded routing table
//! - Host matching is case-insensitive (RFC 3986)
//! - Unparseable mappings fall through to the next candidate

use url::Url;

use super::types::{Mappings, RouteMapping};

/// First label of a host with more than two labels; `""` otherwise.
pub fn subdomain_of(host: &str) -> String {
    let host = host.split(':').next().unwrap_or_default();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return String::new();
    }
    labels[0].to_ascii_lowercase()
}

/// Base URL of a mapping with its path prefix applied.
pub fn mapping_to_base(mapping: &RouteMapping) -> Option<Url> {
    let mut base = Url::parse(mapping.upstream.trim()).ok()?;
    if !matches!(base.scheme(), "http" | "https") {
        return None;
    }
    let prefix = mapping.path_prefix.trim().trim_matches('/');
    if !prefix.is_empty() {
        base.set_path(&format!("/{}", prefix));
    }
    Some(base)
}

/// Upstream base for `host`.
pub fn select_upstream(mappings: &Mappings, host: &str, fallback: &Url) -> Url {
    let sub = subdomain_of(host);
    mappings
        .get(&sub)
        .and_then(mapping_to_base)
        .or_else(|| mappings.get("default").and_then(mapping_to_base))
        .unwrap_or_else(|| fallback.clone())
}

/// `base` path + request path, with the request query.
pub fn target_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut target = base.clone();
    let base_path = base.path().trim_end_matches('/');
    let joined = if path.starts_with('/') {
        format!("{}{}", base_path, path)
    } else {
        format!("{}/{}", base_path, path)
    };
    target.set_path(if joined.is_empty() { "/" } else { &joined });
    target.set_query(query.filter(|q| !q.is_empty()));
    target
}
