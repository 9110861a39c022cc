//! Response header enhancement for cacheable media
//!
//! Every cacheable media response leaves the orchestrator with
//! `Accept-Ranges: bytes`, a `Content-Length`, and at least one validator.
//! `Vary` is simplified so downstream cache keys stay tractable, and `Age`
//! plus the remaining `Cache-Control: max-age` are recomputed on each
//! cache serve.

use crate::error::Result;
use crate::models::{Body, MediaResponse};
use http::{header, HeaderMap, HeaderValue};
use xxhash_rust::xxh3::xxh3_64;

/// Synthesize a weak-but-stable ETag from the resource URL and size
pub fn synthesize_etag(url: &str, content_length: u64) -> String {
    let mut input = Vec::with_capacity(url.len() + 8);
    input.extend_from_slice(url.as_bytes());
    input.extend_from_slice(&content_length.to_le_bytes());
    format!("\"{:016x}\"", xxh3_64(&input))
}

/// `Cache-Control` for a cacheable response with the given freshness
pub fn cache_control_value(max_age: u64) -> HeaderValue {
    HeaderValue::from_str(&format!("public, max-age={}", max_age))
        .unwrap_or_else(|_| HeaderValue::from_static("no-store"))
}

/// `Cache-Control` for responses that must not be cached downstream
pub fn no_store() -> HeaderValue {
    HeaderValue::from_static("no-store")
}

/// Ensure the invariants of a cacheable media response
///
/// - `Accept-Ranges: bytes` is always present
/// - `Content-Length` is present, materializing the body at most once
///   when neither the header nor the body length is known (the only point
///   where full buffering may be unavoidable)
/// - at least one validator exists; an `ETag` is synthesized from the URL
///   and size when both `ETag` and `Last-Modified` are absent
/// - `Vary` is simplified (see [`simplify_vary`])
pub async fn enhance(mut response: MediaResponse, url: &str) -> Result<MediaResponse> {
    response
        .headers
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if response.headers.get(header::CONTENT_LENGTH).is_none() {
        let len = match response.body.len_hint() {
            Some(len) => len,
            None => {
                let body = std::mem::replace(&mut response.body, Body::empty());
                let bytes = body.collect().await?;
                let len = bytes.len() as u64;
                response.body = Body::Full(bytes);
                len
            }
        };
        response
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    if response.headers.get(header::ETAG).is_none()
        && response.headers.get(header::LAST_MODIFIED).is_none()
    {
        let len = response.content_length().unwrap_or(0);
        if let Ok(value) = HeaderValue::from_str(&synthesize_etag(url, len)) {
            response.headers.insert(header::ETAG, value);
        }
    }

    simplify_vary(&mut response.headers);
    Ok(response)
}

/// Simplify `Vary` so the cache key space stays bounded
///
/// A wildcard `Vary: *` makes the entry effectively uncacheable per-key
/// and is dropped entirely; a multi-valued `Vary` collapses to
/// `accept-encoding`, the only dimension the cache keys on.
pub fn simplify_vary(headers: &mut HeaderMap) {
    let joined = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");
    if joined.is_empty() {
        return;
    }

    let tokens: Vec<&str> = joined
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.iter().any(|t| *t == "*") {
        headers.remove(header::VARY);
    } else if tokens.len() > 1 {
        headers.insert(header::VARY, HeaderValue::from_static("accept-encoding"));
    }
}

/// Recompute `Age` and the remaining `Cache-Control: max-age` for a
/// response served from cache
pub fn apply_age(headers: &mut HeaderMap, stored_at_ms: u64, now_ms: u64) {
    let age_secs = now_ms.saturating_sub(stored_at_ms) / 1000;
    headers.insert(header::AGE, HeaderValue::from(age_secs));

    if let Some(max_age) = parse_max_age(headers) {
        let remaining = max_age.saturating_sub(age_secs);
        headers.insert(header::CACHE_CONTROL, cache_control_value(remaining));
    }
}

/// The `max-age` directive of a response's `Cache-Control`, if present
pub(crate) fn parse_max_age(headers: &HeaderMap) -> Option<u64> {
    let cache_control = headers.get(header::CACHE_CONTROL)?.to_str().ok()?;
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|v| v.trim().parse().ok())
}

/// Whether a content type is eligible for persistence
///
/// Parameters (`; charset=...`) are ignored; matching is prefix-based
/// against the configured MIME family allowlist.
pub fn is_cacheable_media(content_type: &str, allowlist: &[String]) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    allowlist.iter().any(|prefix| essence.starts_with(prefix.as_str()))
}
