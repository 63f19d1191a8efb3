//! Bypass-vs-wrap decision.
//!
//! Large, well-behaved media transfers skip supervision. The octet-stream
//! heuristic is best-effort: a miss only costs wrapper overhead.

use axum::http::{header, HeaderMap, StatusCode};
use url::Url;

const MEDIA_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "video/mp2t",
    "application/dash+xml",
];

const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "ts", "m3u8", "mpd", "mov", "avi", "flv", "webm", "mp3", "aac", "flac", "wav",
    "m4a", "ogg", "opus", "m4s", "cmf", "ismv",
];

/// Lower-cased MIME essence of the `content-type` header.
fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn is_media_type(ctype: &str) -> bool {
    ctype.starts_with("video/") || ctype.starts_with("audio/") || MEDIA_TYPES.contains(&ctype)
}

pub fn has_media_extension(url: &Url) -> bool {
    let path = url.path();
    let Some(file) = path.rsplit('/').next() else {
        return false;
    };
    match file.rsplit_once('.') {
        Some((_, ext)) => MEDIA_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Whether a response should be passed through without supervision.
pub fn should_bypass(
    status: StatusCode,
    response_headers: &HeaderMap,
    request_ranged: bool,
    url: &Url,
) -> bool {
    let ranged = status == StatusCode::PARTIAL_CONTENT || request_ranged;
    if ranged {
        return true;
    }
    let ctype = content_type(response_headers);
    if is_media_type(&ctype) {
        return true;
    }
    ctype == "application/octet-stream" && has_media_extension(url)
}
