//! Secondary edge cache adapter
//!
//! Wraps an ephemeral, eventually-consistent cache used as a fast path
//! ahead of the durable store. A `store` is best-effort and may not be
//! visible to the next `retrieve`, so range lookups walk a strict
//! fallback chain instead of trusting any single key shape:
//!
//! 1. range-scoped key (lets a range-aware backend slice for us)
//! 2. full-resource key, sliced locally
//! 3. the original fully-keyed request, as a last resort
//!
//! The fourth tier, extracting from the just-fetched origin response,
//! lives in the orchestrator because only it holds that response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::extractor::RangeExtractor;
use crate::models::{now_ms, MediaRequest, RangeOutcome, RangeSpec};

/// Cache key: the URL plus a normalized header set
///
/// Full-resource entries use an empty header set; range-aware lookups key
/// on the `range` header alone. Keying on the original request keeps all
/// of its headers, which is what makes the tier-3 lookup distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub url: String,
    headers: Vec<(String, String)>,
}

impl EdgeKey {
    /// Key for storing or retrieving the full resource
    pub fn full(url: impl Into<String>) -> Self {
        EdgeKey {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Key carrying only the `range` header, for range-aware backends
    pub fn ranged(url: impl Into<String>, range_value: &str) -> Self {
        EdgeKey {
            url: url.into(),
            headers: vec![("range".to_string(), range_value.to_string())],
        }
    }

    /// Key reproducing the original request's full header set
    pub fn from_request(request: &MediaRequest) -> Self {
        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        headers.sort();
        EdgeKey {
            url: request.url.clone(),
            headers,
        }
    }

    /// The `range` header captured in this key, if any
    pub fn range_value(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == "range")
            .map(|(_, value)| value.as_str())
    }
}

/// A buffered response held by the edge cache
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Storage timestamp, used to recompute `Age` on each serve
    pub stored_at_ms: u64,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        CachedResponse {
            status,
            headers,
            body,
            stored_at_ms: now_ms(),
        }
    }

    /// A 206 view of this (full) response for the given window
    fn partial(&self, range: &RangeSpec) -> CachedResponse {
        let mut headers = self.headers.clone();
        if let Ok(value) = HeaderValue::from_str(&range.content_range()) {
            headers.insert(header::CONTENT_RANGE, value);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        CachedResponse {
            status: StatusCode::PARTIAL_CONTENT,
            headers,
            body: RangeExtractor::extract_buffered(&self.body, range),
            stored_at_ms: self.stored_at_ms,
        }
    }

    /// Whether the advertised `max-age` has fully elapsed since storage
    ///
    /// Entries without a `max-age` never expire here; the durable tier's
    /// backend expiry is their only bound.
    fn is_expired(&self, now: u64) -> bool {
        match crate::headers::parse_max_age(&self.headers) {
            Some(max_age) => now.saturating_sub(self.stored_at_ms) / 1000 >= max_age,
            None => false,
        }
    }

    /// A 416 response for an out-of-bounds window against the given total
    fn range_not_satisfiable(total: u64) -> CachedResponse {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", total)) {
            headers.insert(header::CONTENT_RANGE, value);
        }
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        CachedResponse::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            headers,
            Bytes::from_static(b"Range Not Satisfiable"),
        )
    }
}

/// Ephemeral cache backend with put/match semantics
///
/// Implementations are eventually consistent: a completed `put` is not
/// guaranteed visible to the next `lookup`. Partial-content entries are
/// rejected at the trait boundary since most backends forbid storing 206
/// responses.
#[async_trait]
pub trait EdgeCache: Send + Sync {
    async fn put(&self, key: EdgeKey, response: CachedResponse) -> Result<()>;

    async fn lookup(&self, key: &EdgeKey) -> Result<Option<CachedResponse>>;
}

/// In-memory edge cache
///
/// `range_aware` controls whether a range-scoped lookup may be satisfied
/// by slicing a stored full-resource entry, mirroring backends that do
/// their own range handling. With it disabled only exact-key matches hit,
/// which forces callers down the fallback chain.
///
/// Entries expire with their advertised `Cache-Control: max-age` and are
/// evicted on the lookup that finds them stale, so a cached response is
/// never served past its freshness window.
pub struct MemoryEdgeCache {
    entries: RwLock<HashMap<EdgeKey, CachedResponse>>,
    range_aware: bool,
}

impl MemoryEdgeCache {
    pub fn new() -> Self {
        MemoryEdgeCache {
            entries: RwLock::new(HashMap::new()),
            range_aware: true,
        }
    }

    /// Exact-key matching only; no backend-side range slicing
    pub fn exact_match_only() -> Self {
        MemoryEdgeCache {
            entries: RwLock::new(HashMap::new()),
            range_aware: false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for MemoryEdgeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EdgeCache for MemoryEdgeCache {
    async fn put(&self, key: EdgeKey, response: CachedResponse) -> Result<()> {
        if response.status == StatusCode::PARTIAL_CONTENT {
            return Err(CacheError::EdgeCacheError(
                "refusing to store a partial-content response".to_string(),
            ));
        }
        self.entries.write().await.insert(key, response);
        Ok(())
    }

    async fn lookup(&self, key: &EdgeKey) -> Result<Option<CachedResponse>> {
        let now = now_ms();
        // Write lock so stale entries can be evicted on access, the same
        // way the durable memory backend sweeps on read
        let mut entries = self.entries.write().await;

        if let Some(hit) = entries.get(key).cloned() {
            if hit.is_expired(now) {
                entries.remove(key);
            } else {
                return Ok(Some(hit));
            }
        }

        // Range-aware backends satisfy a ranged key from the full entry
        if self.range_aware {
            if let Some(range_value) = key.range_value() {
                let full_key = EdgeKey::full(key.url.clone());
                if let Some(full) = entries.get(&full_key).cloned() {
                    if full.is_expired(now) {
                        entries.remove(&full_key);
                        return Ok(None);
                    }
                    let total = full.body.len() as u64;
                    return Ok(match RangeSpec::evaluate(Some(range_value), total) {
                        RangeOutcome::Satisfiable(range) => Some(full.partial(&range)),
                        RangeOutcome::Unsatisfiable => {
                            Some(CachedResponse::range_not_satisfiable(total))
                        }
                        _ => Some(full),
                    });
                }
            }
        }
        Ok(None)
    }
}

/// Counters for hit attribution across the fallback tiers
#[derive(Debug, Default)]
pub struct EdgeCacheStats {
    pub ranged_hits: AtomicU64,
    pub full_hits: AtomicU64,
    pub keyed_hits: AtomicU64,
    pub misses: AtomicU64,
    pub store_failures: AtomicU64,
}

/// Adapter enforcing the fallback chain over an [`EdgeCache`] backend
pub struct EdgeCacheAdapter {
    cache: Arc<dyn EdgeCache>,
    stats: Arc<EdgeCacheStats>,
}

impl EdgeCacheAdapter {
    pub fn new(cache: Arc<dyn EdgeCache>) -> Self {
        EdgeCacheAdapter {
            cache,
            stats: Arc::new(EdgeCacheStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EdgeCacheStats> {
        self.stats.clone()
    }

    /// Best-effort store under the full-resource key
    ///
    /// Partial-content responses are skipped outright and backend failures
    /// are logged, never propagated.
    pub async fn store(&self, url: &str, response: CachedResponse) {
        if response.status == StatusCode::PARTIAL_CONTENT {
            debug!(url = %url, "skipping edge store of partial-content response");
            return;
        }
        if let Err(e) = self.cache.put(EdgeKey::full(url), response).await {
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
            warn!(url = %url, error = %e, "edge cache store failed");
        }
    }

    /// Full-resource lookup for requests without a `Range` header
    pub async fn retrieve(&self, url: &str) -> Option<CachedResponse> {
        match self.cache.lookup(&EdgeKey::full(url)).await {
            Ok(Some(hit)) => {
                self.stats.full_hits.fetch_add(1, Ordering::Relaxed);
                Some(hit)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(url = %url, error = %e, "edge cache lookup failed");
                None
            }
        }
    }

    /// Range lookup walking the fallback chain in order
    ///
    /// Tier 1 trusts a range-aware backend's own slicing. Tier 2 slices a
    /// full-resource hit locally, which may surface a 416 when the stored
    /// entry proves the window out of bounds. Tier 3 retries with the
    /// original fully-keyed request. A hit that is already 206 at any tier
    /// is returned unmodified.
    pub async fn retrieve_range(
        &self,
        request: &MediaRequest,
        range_value: &str,
    ) -> Option<CachedResponse> {
        let url = request.url.as_str();

        // Tier 1: range-scoped key
        match self.cache.lookup(&EdgeKey::ranged(url, range_value)).await {
            Ok(Some(hit)) => {
                debug!(url = %url, range = %range_value, "edge cache hit (ranged key)");
                self.stats.ranged_hits.fetch_add(1, Ordering::Relaxed);
                return Some(hit);
            }
            Ok(None) => {}
            Err(e) => warn!(url = %url, error = %e, "ranged edge lookup failed"),
        }

        // Tier 2: full-resource key, sliced here
        match self.cache.lookup(&EdgeKey::full(url)).await {
            Ok(Some(full)) => {
                self.stats.full_hits.fetch_add(1, Ordering::Relaxed);
                if full.status == StatusCode::PARTIAL_CONTENT {
                    return Some(full);
                }
                let total = full.body.len() as u64;
                return match RangeSpec::evaluate(Some(range_value), total) {
                    RangeOutcome::Satisfiable(range) => {
                        debug!(url = %url, range = %range_value, "edge cache hit (full key, sliced)");
                        Some(full.partial(&range))
                    }
                    RangeOutcome::Unsatisfiable => {
                        Some(CachedResponse::range_not_satisfiable(total))
                    }
                    // Malformed headers degrade to the full response
                    _ => Some(full),
                };
            }
            Ok(None) => {}
            Err(e) => warn!(url = %url, error = %e, "full-key edge lookup failed"),
        }

        // Tier 3: original fully-keyed request
        match self.cache.lookup(&EdgeKey::from_request(request)).await {
            Ok(Some(hit)) => {
                debug!(url = %url, "edge cache hit (original request key)");
                self.stats.keyed_hits.fetch_add(1, Ordering::Relaxed);
                Some(hit)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(url = %url, error = %e, "keyed edge lookup failed");
                None
            }
        }
    }
}
