//! Header normalization.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (RFC 7230 §6.1) on both legs
//! - Drop client identity headers before forwarding upstream
//! - Relax origin-imposed response policies the proxy cannot honour
//!
//! # Design Decisions
//! - `Connection` is parsed before anything is deleted; reading it afterwards
//!   would leak the extra hop-by-hop fields it names
//! - Upgrade handshakes keep `Connection`/`Upgrade`
//! - Proxy credentials survive on the request leg

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Always hop-by-hop.
const FIXED_HOP_BY_HOP: &[&str] = &[
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

const PROXY_AUTH: &[&str] = &["proxy-authenticate", "proxy-authorization"];

const UPGRADE_PAIR: &[&str] = &["connection", "upgrade"];

/// Client identity headers not forwarded to the origin.
const CLIENT_IDENTITY: &[&str] = &["cf-connecting-ip", "x-forwarded-for", "cf-ray", "cf-visitor"];

/// Response headers removed before reaching the client.
const BLOCKED_RESPONSE: &[&str] = &["content-security-policy", "clear-site-data"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripOptions {
    /// Keep `Connection` and `Upgrade` (protocol upgrades, 101 responses).
    pub preserve_upgrade: bool,
    /// Request leg; keeps proxy credentials.
    pub is_request_side: bool,
}

/// Field names listed in `Connection`, trimmed and lower-cased.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Remove hop-by-hop headers in place. Idempotent.
pub fn strip(headers: &mut HeaderMap, opts: StripOptions) {
    let declared = connection_tokens(headers);

    for name in FIXED_HOP_BY_HOP {
        headers.remove(*name);
    }
    if !opts.is_request_side {
        for name in PROXY_AUTH {
            headers.remove(*name);
        }
    }
    if !opts.preserve_upgrade {
        for name in UPGRADE_PAIR {
            headers.remove(*name);
        }
    }

    for name in &declared {
        if opts.preserve_upgrade && UPGRADE_PAIR.contains(&name.as_str()) {
            continue;
        }
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.remove(name);
        }
    }
}

/// Drop headers that identify the client to the origin.
pub fn scrub_client_identity(headers: &mut HeaderMap) {
    for name in CLIENT_IDENTITY {
        headers.remove(*name);
    }
}

/// Remove blocked response policies and allow any origin.
pub fn relax_response(headers: &mut HeaderMap) {
    for name in BLOCKED_RESPONSE {
        headers.remove(*name);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}
