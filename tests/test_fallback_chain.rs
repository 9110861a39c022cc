// Integration tests for the edge cache fallback chain under an
// eventually-consistent backend: a completed store may not be visible to
// the next lookup, and each tier must still be attempted in order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use media_edge_cache::{
    CachedResponse, EdgeCache, EdgeCacheAdapter, EdgeKey, MediaRequest, MemoryEdgeCache, Result,
};

/// Backend whose writes become visible only after `lag` subsequent
/// lookups, mimicking replication delay
struct LaggingEdgeCache {
    inner: MemoryEdgeCache,
    lag: AtomicU32,
}

impl LaggingEdgeCache {
    fn new(lag: u32) -> Self {
        LaggingEdgeCache {
            inner: MemoryEdgeCache::new(),
            lag: AtomicU32::new(lag),
        }
    }
}

#[async_trait]
impl EdgeCache for LaggingEdgeCache {
    async fn put(&self, key: EdgeKey, response: CachedResponse) -> Result<()> {
        self.inner.put(key, response).await
    }

    async fn lookup(&self, key: &EdgeKey) -> Result<Option<CachedResponse>> {
        let lagging = self
            .lag
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if lagging.is_ok() {
            return Ok(None);
        }
        self.inner.lookup(key).await
    }
}

fn media_response(body: &'static [u8]) -> CachedResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    CachedResponse::new(StatusCode::OK, headers, Bytes::from_static(body))
}

#[tokio::test]
async fn test_store_not_immediately_visible() {
    let adapter = EdgeCacheAdapter::new(Arc::new(LaggingEdgeCache::new(1)));
    adapter.store("/v.mp4", media_response(b"0123456789")).await;

    // Replication lag: the first lookup misses, the next one hits
    assert!(adapter.retrieve("/v.mp4").await.is_none());
    assert!(adapter.retrieve("/v.mp4").await.is_some());
}

#[tokio::test]
async fn test_range_lookup_survives_tier_one_lag() {
    // The ranged lookup misses while lagging; the full-key lookup that
    // follows hits and is sliced locally
    let adapter = EdgeCacheAdapter::new(Arc::new(LaggingEdgeCache::new(1)));
    adapter.store("/v.mp4", media_response(b"0123456789")).await;

    let request = MediaRequest::get("/v.mp4");
    let hit = adapter.retrieve_range(&request, "bytes=2-5").await.unwrap();

    assert_eq!(hit.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(hit.body, Bytes::from_static(b"2345"));
    assert_eq!(adapter.stats().full_hits.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_range_lookup_falls_to_tier_three() {
    // First two tiers lag; the fully-keyed lookup is the one that lands
    let backend = Arc::new(LaggingEdgeCache::new(2));
    let request = MediaRequest::get("/v.mp4").with_header(header::RANGE, "bytes=0-3");
    backend
        .put(EdgeKey::from_request(&request), media_response(b"0123456789"))
        .await
        .unwrap();

    let adapter = EdgeCacheAdapter::new(backend);
    let hit = adapter.retrieve_range(&request, "bytes=0-3").await.unwrap();

    assert_eq!(hit.status, StatusCode::OK);
    assert_eq!(adapter.stats().keyed_hits.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_all_tiers_exhausted_is_a_miss() {
    let adapter = EdgeCacheAdapter::new(Arc::new(LaggingEdgeCache::new(3)));
    adapter.store("/v.mp4", media_response(b"0123456789")).await;

    let request = MediaRequest::get("/v.mp4");
    assert!(adapter.retrieve_range(&request, "bytes=0-3").await.is_none());
    assert_eq!(adapter.stats().misses.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_stored_entry_keeps_headers_and_timestamp() {
    let adapter = EdgeCacheAdapter::new(Arc::new(MemoryEdgeCache::new()));
    let response = media_response(b"0123456789");
    let stored_at = response.stored_at_ms;
    adapter.store("/v.mp4", response).await;

    let hit = adapter.retrieve("/v.mp4").await.unwrap();
    assert_eq!(hit.headers.get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(hit.stored_at_ms, stored_at);
}

/// Backend that answers every lookup with the same canned response, the
/// way a range-slicing backend answers a ranged key with its own 206
struct CannedEdgeCache {
    response: CachedResponse,
}

#[async_trait]
impl EdgeCache for CannedEdgeCache {
    async fn put(&self, _key: EdgeKey, _response: CachedResponse) -> Result<()> {
        Ok(())
    }

    async fn lookup(&self, _key: &EdgeKey) -> Result<Option<CachedResponse>> {
        Ok(Some(self.response.clone()))
    }
}

#[tokio::test]
async fn test_backend_206_returned_unmodified() {
    let mut partial = media_response(b"2345");
    partial.status = StatusCode::PARTIAL_CONTENT;
    partial.headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_static("bytes 2-5/10"),
    );

    let adapter = EdgeCacheAdapter::new(Arc::new(CannedEdgeCache { response: partial }));
    let request = MediaRequest::get("/v.mp4");
    let hit = adapter.retrieve_range(&request, "bytes=2-5").await.unwrap();

    // Already-partial responses pass through, never re-sliced
    assert_eq!(hit.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        hit.headers.get(header::CONTENT_RANGE).unwrap(),
        "bytes 2-5/10"
    );
    assert_eq!(hit.body, Bytes::from_static(b"2345"));
}
