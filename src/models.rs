//! Core data models for the media edge cache

use crate::error::{CacheError, Result};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Current wall-clock time in unix milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A validated byte window derived from an HTTP `Range` header
///
/// Invariant: `0 <= start <= end < total`. A `RangeSpec` is never
/// partially valid; parsing either yields a spec satisfying the invariant
/// or a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeSpec {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
    /// Total size of the resource in bytes
    pub total: u64,
}

/// Outcome of evaluating a `Range` header against a known total size
///
/// The distinction between `Malformed` and `Unsatisfiable` drives the
/// response: malformed headers are treated as absent (full 200), while a
/// well-formed but out-of-bounds range must produce a 416.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No `Range` header was present
    Absent,
    /// The header was present but syntactically invalid; serve the full body
    Malformed,
    /// Syntactically valid but numerically out of bounds; respond 416
    Unsatisfiable,
    /// A fully validated byte window
    Satisfiable(RangeSpec),
}

impl RangeSpec {
    /// Create a new RangeSpec, enforcing the invariant
    pub fn new(start: u64, end: u64, total: u64) -> Result<Self> {
        if start > end || end >= total {
            return Err(CacheError::InvalidRange(format!(
                "invalid window {}-{} for total {}",
                start, end, total
            )));
        }
        Ok(RangeSpec { start, end, total })
    }

    /// Number of bytes covered by this window
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether the window is empty (never true for a valid spec)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` header value for a 206 response
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }

    /// Parse a `Range` header against a known total size
    ///
    /// Returns `Some` only for a satisfiable window; absent, malformed and
    /// unsatisfiable headers all collapse to `None`. Callers that need to
    /// produce a 416 for well-formed but out-of-bounds ranges should use
    /// [`RangeSpec::evaluate`] instead.
    pub fn parse(header: Option<&str>, total: u64) -> Option<RangeSpec> {
        match Self::evaluate(header, total) {
            RangeOutcome::Satisfiable(spec) => Some(spec),
            _ => None,
        }
    }

    /// Evaluate a `Range` header against a known total size
    ///
    /// Three syntactic forms are accepted:
    /// - closed `bytes=A-B`: valid iff `A <= B` and `A < total`; `B` is
    ///   clamped to `total - 1`
    /// - open `bytes=A-`: runs to the end of the resource
    /// - suffix `bytes=-N`: the final `N` bytes, valid iff `N > 0`
    ///
    /// Multipart ranges are unsupported and rejected as malformed.
    pub fn evaluate(header: Option<&str>, total: u64) -> RangeOutcome {
        let Some(raw) = header else {
            return RangeOutcome::Absent;
        };

        let raw = raw.trim();
        let Some(range_part) = raw.strip_prefix("bytes=") else {
            return RangeOutcome::Malformed;
        };
        let range_part = range_part.trim();

        // Multipart ranges are rejected whole, never partially honored
        if range_part.contains(',') {
            return RangeOutcome::Malformed;
        }

        // Suffix form: "-N"
        if let Some(suffix) = range_part.strip_prefix('-') {
            let Ok(n) = suffix.trim().parse::<u64>() else {
                // Covers "bytes=-" and non-numeric suffixes
                return RangeOutcome::Malformed;
            };
            if n == 0 || total == 0 {
                return RangeOutcome::Unsatisfiable;
            }
            let start = total.saturating_sub(n);
            return RangeOutcome::Satisfiable(RangeSpec {
                start,
                end: total - 1,
                total,
            });
        }

        let mut parts = range_part.splitn(2, '-');
        let start_str = parts.next().unwrap_or("");
        let Some(end_str) = parts.next() else {
            return RangeOutcome::Malformed;
        };
        let Ok(start) = start_str.trim().parse::<u64>() else {
            return RangeOutcome::Malformed;
        };

        // Open form: "A-"
        if end_str.trim().is_empty() {
            if start >= total {
                return RangeOutcome::Unsatisfiable;
            }
            return RangeOutcome::Satisfiable(RangeSpec {
                start,
                end: total - 1,
                total,
            });
        }

        // Closed form: "A-B"
        let Ok(end) = end_str.trim().parse::<u64>() else {
            return RangeOutcome::Malformed;
        };
        if start > end {
            return RangeOutcome::Malformed;
        }
        if start >= total {
            return RangeOutcome::Unsatisfiable;
        }
        RangeOutcome::Satisfiable(RangeSpec {
            start,
            end: end.min(total - 1),
            total,
        })
    }
}

/// Metadata stored alongside a cache entry's value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    /// Cache key this metadata belongs to
    pub key: String,
    /// MIME type of the stored body
    pub content_type: String,
    /// Size of the stored body in bytes
    pub content_length: u64,
    /// HTTP status the entry was stored with
    pub status: u16,
    /// Creation timestamp, unix milliseconds
    pub created_at: u64,
    /// Advertised expiry, unix milliseconds
    ///
    /// Governs the HTTP-facing Cache-Control countdown only; the backend
    /// record lifetime may be independently indefinite.
    pub expires_at: Option<u64>,
    /// TTL the entry was stored with, in seconds
    pub ttl_seconds: u32,
    /// When set, the backend record never expires on its own
    #[serde(default)]
    pub store_indefinitely: bool,
}

impl CacheEntryMetadata {
    /// Create metadata for a fresh entry
    ///
    /// `expires_at` is always computed, including for indefinite storage,
    /// so `Cache-Control: max-age` can still count down at browsers and
    /// edges that honor it.
    pub fn new(
        key: impl Into<String>,
        content_type: impl Into<String>,
        content_length: u64,
        status: u16,
        ttl_seconds: u32,
        store_indefinitely: bool,
    ) -> Self {
        let created_at = now_ms();
        CacheEntryMetadata {
            key: key.into(),
            content_type: content_type.into(),
            content_length,
            status,
            created_at,
            expires_at: Some(created_at + ttl_seconds as u64 * 1000),
            ttl_seconds,
            store_indefinitely,
        }
    }

    /// Produce renewed metadata for a TTL refresh
    ///
    /// The value is untouched by refresh; only the freshness window moves.
    pub fn renewed(&self, original_ttl: u32) -> Self {
        let created_at = now_ms();
        CacheEntryMetadata {
            created_at,
            expires_at: Some(created_at + original_ttl as u64 * 1000),
            ttl_seconds: original_ttl,
            ..self.clone()
        }
    }

    /// Seconds elapsed since the entry was created
    pub fn elapsed_seconds(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at) / 1000
    }

    /// Seconds until the advertised expiry, negative once stale
    pub fn remaining_seconds(&self, now: u64) -> i64 {
        match self.expires_at {
            Some(expires) => (expires as i64 - now as i64) / 1000,
            None => 0,
        }
    }

    /// The TTL the entry was originally stored with
    ///
    /// Derived from the created/expires pair; falls back to `default_ttl`
    /// for records without an advertised expiry.
    pub fn original_ttl_seconds(&self, default_ttl: u32) -> u32 {
        match self.expires_at {
            Some(expires) if expires > self.created_at => {
                ((expires - self.created_at) / 1000) as u32
            }
            _ => default_ttl,
        }
    }

    /// Remaining advertised freshness in seconds, clamped at zero
    pub fn advertised_max_age(&self, now: u64) -> u64 {
        self.remaining_seconds(now).max(0) as u64
    }
}

/// A durable cache entry: metadata plus the stored body
///
/// Each `get` yields a fresh, independently consumable body; the
/// orchestrator never retains a long-lived reference.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub metadata: CacheEntryMetadata,
    pub body: Bytes,
}

/// An inbound request for a transformed media resource
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

impl MediaRequest {
    /// Create a GET request for a URL
    pub fn get(url: impl Into<String>) -> Self {
        MediaRequest {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Create a request with an explicit method
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        MediaRequest {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Attach a header, builder style
    pub fn with_header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(v) = http::HeaderValue::from_str(value) {
            self.headers.insert(name, v);
        }
        self
    }

    /// The `Range` header value, if present and valid UTF-8
    pub fn range_header(&self) -> Option<&str> {
        self.headers
            .get(http::header::RANGE)
            .and_then(|v| v.to_str().ok())
    }

    /// Path component of the request URL, without scheme, host or query
    pub fn path(&self) -> &str {
        let rest = match self.url.find("://") {
            Some(idx) => &self.url[idx + 3..],
            None => &self.url,
        };
        let path = match rest.find('/') {
            Some(slash) => &rest[slash..],
            None => "/",
        };
        match path.find('?') {
            Some(q) => &path[..q],
            None => path,
        }
    }
}

/// Response body: fully materialized or streamed chunk by chunk
#[derive(Debug)]
pub enum Body {
    /// Entire body held in memory
    Full(Bytes),
    /// Chunked body delivered through a channel
    Stream(mpsc::Receiver<Result<Bytes>>),
}

impl Body {
    /// An empty body
    pub fn empty() -> Self {
        Body::Full(Bytes::new())
    }

    /// Create a streamed body and the sender feeding it
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<Bytes>>, Body) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Body::Stream(rx))
    }

    /// Known size, if the body is already materialized
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            Body::Full(bytes) => Some(bytes.len() as u64),
            Body::Stream(_) => None,
        }
    }

    /// Materialize the body into a single buffer
    ///
    /// For already-full bodies this is free; for streams it drains the
    /// channel, propagating the first mid-stream error.
    pub async fn collect(self) -> Result<Bytes> {
        match self {
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

/// An HTTP response flowing through the cache
#[derive(Debug)]
pub struct MediaResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl MediaResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Body) -> Self {
        MediaResponse {
            status,
            headers,
            body,
        }
    }

    /// `Content-Length`, from the header or the materialized body
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .or_else(|| self.body.len_hint())
    }

    /// `Content-Type` header value, if present
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Build a 416 Range Not Satisfiable response
    pub fn not_satisfiable(total: u64) -> Self {
        let body = Bytes::from_static(b"Range Not Satisfiable");
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_RANGE,
            http::HeaderValue::from_str(&format!("bytes */{}", total))
                .unwrap_or_else(|_| http::HeaderValue::from_static("bytes */0")),
        );
        headers.insert(
            http::header::ACCEPT_RANGES,
            http::HeaderValue::from_static("bytes"),
        );
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain"),
        );
        headers.insert(
            http::header::CONTENT_LENGTH,
            http::HeaderValue::from(body.len() as u64),
        );
        MediaResponse {
            status: StatusCode::RANGE_NOT_SATISFIABLE,
            headers,
            body: Body::Full(body),
        }
    }

    /// Build a 502 response from an origin failure
    pub fn bad_gateway(err: &CacheError) -> Self {
        let status = StatusCode::from_u16(err.to_http_status())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let body = Bytes::from(format!("upstream fetch failed: {}", err));
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain"),
        );
        headers.insert(
            http::header::CONTENT_LENGTH,
            http::HeaderValue::from(body.len() as u64),
        );
        MediaResponse {
            status,
            headers,
            body: Body::Full(body),
        }
    }
}
