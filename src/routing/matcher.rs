//! Request classification.
//!
//! # Responsibilities
//! - Recognise video/download paths, HLS playlists and playback-info calls
//! - Detect protocol upgrades and ranged requests
//!
//! # Design Decisions
//! - Path matching is case-insensitive; media servers vary casing
//! - No regex, prefix/substring scans only
//! - Deterministic: same input always yields the same class

use axum::http::{header, HeaderMap, Method};

/// How the dispatcher should handle a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Protocol upgrade (WebSocket), tunneled as-is.
    Upgrade,
    /// Video or ranged traffic, delivered through the media engine.
    Media,
    /// Playlists and playback negotiation, longer deadline.
    Critical,
    /// Everything else.
    Api,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Upgrade => "upgrade",
            RequestKind::Media => "media",
            RequestKind::Critical => "critical",
            RequestKind::Api => "api",
        }
    }
}

pub fn is_video_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if lower.contains("/videos/") {
        return true;
    }
    match lower.find("/items/") {
        Some(idx) => {
            let rest = &lower[idx + "/items/".len()..];
            rest.contains("/download") || rest.contains("/stream")
        }
        None => false,
    }
}

pub fn is_m3u8(path: &str) -> bool {
    path.to_ascii_lowercase().contains(".m3u8")
}

pub fn is_playback_info(path: &str) -> bool {
    path.to_ascii_lowercase().contains("/playbackinfo")
}

pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

pub fn has_range(headers: &HeaderMap) -> bool {
    headers.contains_key(header::RANGE)
}

pub fn classify(method: &Method, path: &str, headers: &HeaderMap) -> RequestKind {
    if is_upgrade(headers) && *method == Method::GET {
        RequestKind::Upgrade
    } else if is_video_path(path) || has_range(headers) {
        RequestKind::Media
    } else if is_m3u8(path) || is_playback_info(path) {
        RequestKind::Critical
    } else {
        RequestKind::Api
    }
}
