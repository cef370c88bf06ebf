//! HTTP cache validation module
//!
//! Provides `ETag` generation and conditional request handling
//! (`If-None-Match`, `If-Modified-Since`).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Generate `ETag` using fast hashing
///
/// Returns a quoted strong `ETag` string, e.g. `"abc123def"`.
pub fn generate_etag(content: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    let v = hasher.finish();
    format!("\"{v:x}\"")
}

/// Check if client's `If-None-Match` header matches the server's `ETag`
///
/// Supports a single `ETag`, a comma separated list, and the `*` wildcard.
pub fn check_etag_match(if_none_match: Option<&str>, etag: &str) -> bool {
    if_none_match.is_some_and(|client_etag| {
        client_etag
            .split(',')
            .map(str::trim)
            .any(|e| e == etag || e == "*")
    })
}

/// Check whether the file is unchanged since the client's `If-Modified-Since`
///
/// HTTP dates carry whole seconds, so the modification time is truncated
/// before comparing. An unparseable header never matches.
pub fn not_modified_since(if_modified_since: Option<&str>, modified: SystemTime) -> bool {
    let Some(since) = if_modified_since.and_then(|v| httpdate::parse_http_date(v.trim()).ok())
    else {
        return false;
    };
    truncate_to_secs(modified) <= since
}

/// Format a modification time as an HTTP-date for `Last-Modified`
pub fn last_modified(modified: SystemTime) -> String {
    httpdate::fmt_http_date(modified)
}

fn truncate_to_secs(time: SystemTime) -> SystemTime {
    time.duration_since(UNIX_EPOCH)
        .map_or(time, |d| UNIX_EPOCH + Duration::from_secs(d.as_secs()))
}
