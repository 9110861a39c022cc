// End-to-end tests for the read-through engine: population on miss,
// subsequent serves from cache, and range handling at each layer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use media_edge_cache::{
    Body, CacheConfig, MediaRequest, MediaResponse, MemoryEdgeCache, MemoryKvBackend, OriginFetch,
    ReadThrough, Result, TtlProfileConfig, TtlOverrides,
};

struct CountingOrigin {
    content_type: &'static str,
    body: &'static [u8],
    fetches: AtomicU32,
}

impl CountingOrigin {
    fn video(body: &'static [u8]) -> Self {
        CountingOrigin {
            content_type: "video/mp4",
            body,
            fetches: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl OriginFetch for CountingOrigin {
    async fn fetch(&self, _request: &MediaRequest) -> Result<MediaResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        Ok(MediaResponse::new(
            StatusCode::OK,
            headers,
            Body::Full(Bytes::from_static(self.body)),
        ))
    }
}

fn engine_with(config: CacheConfig) -> ReadThrough {
    ReadThrough::new(
        Arc::new(config),
        Arc::new(MemoryKvBackend::new()),
        Arc::new(MemoryEdgeCache::new()),
    )
}

async fn settle() {
    // Persistence and refresh are fire-and-forget
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_miss_populates_both_cache_tiers() {
    let engine = engine_with(CacheConfig::default());
    let origin = CountingOrigin::video(b"0123456789");
    let request = MediaRequest::get("/v.mp4");

    let first = engine.handle(&request, &origin).await;
    assert_eq!(first.status, StatusCode::OK);
    settle().await;

    assert!(engine.store().get("/v.mp4").await.is_some());
    assert!(engine.edge().retrieve("/v.mp4").await.is_some());
    assert_eq!(origin.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_range_served_from_cached_entry_without_refetch() {
    let engine = engine_with(CacheConfig::default());
    let origin = CountingOrigin::video(b"0123456789");

    let _ = engine.handle(&MediaRequest::get("/v.mp4"), &origin).await;
    settle().await;

    let ranged = MediaRequest::get("/v.mp4").with_header(header::RANGE, "bytes=3-6");
    let response = engine.handle(&ranged, &origin).await;

    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers.get(header::CONTENT_RANGE).unwrap(),
        "bytes 3-6/10"
    );
    assert_eq!(response.body.collect().await.unwrap(), "3456");
    assert_eq!(origin.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsatisfiable_range_against_cached_entry() {
    let engine = engine_with(CacheConfig::default());
    let origin = CountingOrigin::video(b"0123456789");

    let _ = engine.handle(&MediaRequest::get("/v.mp4"), &origin).await;
    settle().await;

    let ranged = MediaRequest::get("/v.mp4").with_header(header::RANGE, "bytes=99-");
    let response = engine.handle(&ranged, &origin).await;

    assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers.get(header::CONTENT_RANGE).unwrap(),
        "bytes */10"
    );
    // No refetch for an out-of-bounds window
    assert_eq!(origin.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_suffix_range_on_miss() {
    let engine = engine_with(CacheConfig::default());
    let origin = CountingOrigin::video(b"0123456789");
    let request = MediaRequest::get("/v.mp4").with_header(header::RANGE, "bytes=-3");

    let response = engine.handle(&request, &origin).await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers.get(header::CONTENT_RANGE).unwrap(),
        "bytes 7-9/10"
    );
    assert_eq!(response.body.collect().await.unwrap(), "789");
}

#[tokio::test]
async fn test_profile_ttl_applies_to_matching_path() {
    let mut config = CacheConfig::default();
    config.profiles = vec![TtlProfileConfig {
        name: "thumbnails".to_string(),
        patterns: vec!["^/thumb/".to_string()],
        ttl: TtlOverrides {
            ok: Some(86_400),
            ..TtlOverrides::default()
        },
    }];
    let engine = engine_with(config);

    let origin = CountingOrigin {
        content_type: "image/webp",
        body: b"img",
        fetches: AtomicU32::new(0),
    };
    let response = engine
        .handle(&MediaRequest::get("/thumb/a.webp"), &origin)
        .await;

    assert_eq!(
        response.headers.get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=86400"
    );
}

#[tokio::test]
async fn test_cached_serve_carries_freshness_headers() {
    let engine = engine_with(CacheConfig::default());
    let origin = CountingOrigin::video(b"0123456789");

    let _ = engine.handle(&MediaRequest::get("/v.mp4"), &origin).await;
    settle().await;

    let response = engine.handle(&MediaRequest::get("/v.mp4"), &origin).await;
    assert!(response.headers.get(header::AGE).is_some());
    let cache_control = response
        .headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(cache_control.starts_with("public, max-age="));
    assert_eq!(
        response.headers.get(header::ACCEPT_RANGES).unwrap(),
        "bytes"
    );
}

#[tokio::test]
async fn test_delete_forces_refetch() {
    let engine = engine_with(CacheConfig::default());
    let origin = CountingOrigin::video(b"0123456789");
    let request = MediaRequest::get("/v.mp4");

    let _ = engine.handle(&request, &origin).await;
    settle().await;
    assert!(engine.store().delete("/v.mp4").await);

    // The edge tier may still answer; exercise the durable path directly
    assert!(engine.store().get("/v.mp4").await.is_none());
}

#[tokio::test]
async fn test_post_is_never_cached() {
    let engine = engine_with(CacheConfig::default());
    let origin = CountingOrigin::video(b"0123456789");
    let request = MediaRequest::new(Method::POST, "/v.mp4");

    let _ = engine.handle(&request, &origin).await;
    settle().await;

    assert!(engine.store().get("/v.mp4").await.is_none());
    assert!(engine.edge().retrieve("/v.mp4").await.is_none());
}
