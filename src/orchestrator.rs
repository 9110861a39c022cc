//! Read-through orchestration
//!
//! Top-level coordinator for a single media request. The flow is
//! CheckCache (edge, then durable store) -> OriginFetch -> EnhanceHeaders
//! -> PersistAsync -> ServeRange or ServeFull. Persistence runs on a
//! spawned task so the response path never waits on write latency, and a
//! durable-store hit schedules a background TTL refresh before serving.

use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::edge_cache::{CachedResponse, EdgeCache, EdgeCacheAdapter};
use crate::extractor::RangeExtractor;
use crate::headers;
use crate::models::{
    now_ms, Body, CacheEntry, CacheEntryMetadata, MediaRequest, MediaResponse, RangeOutcome,
    RangeSpec,
};
use crate::origin::OriginFetch;
use crate::refresher::TtlRefresher;
use crate::store::{CacheEntryStore, KvBackend};
use crate::ttl_policy::TtlResolver;

/// The read-through cache engine
pub struct ReadThrough {
    store: Arc<CacheEntryStore>,
    edge: Arc<EdgeCacheAdapter>,
    refresher: TtlRefresher,
    resolver: TtlResolver,
    config: Arc<CacheConfig>,
}

impl ReadThrough {
    pub fn new(
        config: Arc<CacheConfig>,
        backend: Arc<dyn KvBackend>,
        edge: Arc<dyn EdgeCache>,
    ) -> Self {
        let store = Arc::new(CacheEntryStore::new(backend, config.clone()));
        let refresher = TtlRefresher::new(store.clone(), config.clone());
        let resolver = TtlResolver::new(&config);
        ReadThrough {
            store,
            edge: Arc::new(EdgeCacheAdapter::new(edge)),
            refresher,
            resolver,
            config,
        }
    }

    /// The durable store, for inspection and explicit invalidation
    pub fn store(&self) -> Arc<CacheEntryStore> {
        self.store.clone()
    }

    /// The edge cache adapter
    pub fn edge(&self) -> Arc<EdgeCacheAdapter> {
        self.edge.clone()
    }

    /// Resolve a request to a response
    ///
    /// Never returns an error; every failure path degrades to an HTTP
    /// error response so the caller always has something to serve.
    pub async fn handle(&self, request: &MediaRequest, origin: &dyn OriginFetch) -> MediaResponse {
        // Non-GET requests bypass caching entirely
        if request.method != Method::GET {
            debug!(method = %request.method, url = %request.url, "bypassing cache for non-GET");
            return match origin.fetch(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %request.url, error = %e, "origin fetch failed");
                    MediaResponse::bad_gateway(&e)
                }
            };
        }

        let range_value = request.range_header().map(str::to_owned);

        // CheckCache: edge cache first
        let edge_hit = match range_value.as_deref() {
            Some(rv) => self.edge.retrieve_range(request, rv).await,
            None => self.edge.retrieve(&request.url).await,
        };
        if let Some(hit) = edge_hit {
            debug!(url = %request.url, status = %hit.status, "serving from edge cache");
            return Self::serve_edge_hit(hit);
        }

        // CheckCache: durable store
        if let Some(entry) = self.store.get(&request.url).await {
            self.refresher.maybe_refresh(&entry.metadata, true).await;
            debug!(url = %request.url, "serving from durable store");
            return Self::serve_entry(entry, range_value.as_deref());
        }

        // OriginFetch
        let response = match origin.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "origin fetch failed");
                return MediaResponse::bad_gateway(&e);
            }
        };

        // A partial origin response is passed through untouched; it is
        // never cached or re-wrapped
        if response.status == StatusCode::PARTIAL_CONTENT {
            debug!(url = %request.url, "origin returned 206, passing through");
            return response;
        }

        // EnhanceHeaders
        let mut response = match headers::enhance(response, &request.url).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "header enhancement failed");
                return MediaResponse::bad_gateway(&e);
            }
        };

        // PersistAsync, gated on status and the media allowlist
        let content_type = response.content_type().unwrap_or("").to_string();
        let cacheable = response.status.as_u16() < 400
            && headers::is_cacheable_media(&content_type, &self.config.cacheable_types);

        if cacheable {
            let ttl = self.resolver.resolve(response.status.as_u16(), request.path());
            response
                .headers
                .insert(header::CACHE_CONTROL, headers::cache_control_value(ttl as u64));

            // Persistence needs the whole body; keep a buffered copy on
            // the serve path too
            let body = std::mem::replace(&mut response.body, Body::empty());
            let bytes = match body.collect().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(url = %request.url, error = %e, "origin body collection failed");
                    return MediaResponse::bad_gateway(&e);
                }
            };
            response.body = Body::Full(bytes.clone());

            self.persist_async(
                request.url.clone(),
                response.status,
                response.headers.clone(),
                bytes,
                content_type,
                ttl,
            );
        } else {
            response
                .headers
                .insert(header::CACHE_CONTROL, headers::no_store());
        }

        // ServeRange: last-resort extraction from the in-hand response
        if let Some(rv) = range_value {
            let total = response.content_length().unwrap_or(0);
            match RangeSpec::evaluate(Some(&rv), total) {
                RangeOutcome::Satisfiable(range) => {
                    return RangeExtractor::partial_response(response, range);
                }
                RangeOutcome::Unsatisfiable => {
                    return MediaResponse::not_satisfiable(total);
                }
                // Malformed and absent headers serve the full response
                _ => {}
            }
        }
        response
    }

    /// An edge cache hit is served as stored, with `Age` and the remaining
    /// freshness recomputed
    fn serve_edge_hit(hit: CachedResponse) -> MediaResponse {
        let mut headers = hit.headers;
        headers::apply_age(&mut headers, hit.stored_at_ms, now_ms());
        MediaResponse::new(hit.status, headers, Body::Full(hit.body))
    }

    /// Serve a durable-store entry, applying the range outcome against the
    /// stored length
    fn serve_entry(entry: CacheEntry, range_value: Option<&str>) -> MediaResponse {
        let now = now_ms();
        let metadata = &entry.metadata;

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&metadata.content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from(metadata.content_length),
        );
        headers.insert(
            header::CACHE_CONTROL,
            headers::cache_control_value(metadata.advertised_max_age(now)),
        );
        headers.insert(
            header::AGE,
            HeaderValue::from(metadata.elapsed_seconds(now)),
        );

        let status = StatusCode::from_u16(metadata.status).unwrap_or(StatusCode::OK);
        let total = metadata.content_length;
        let response = MediaResponse::new(status, headers, Body::Full(entry.body));

        match RangeSpec::evaluate(range_value, total) {
            RangeOutcome::Satisfiable(range) => RangeExtractor::partial_response(response, range),
            RangeOutcome::Unsatisfiable => MediaResponse::not_satisfiable(total),
            _ => response,
        }
    }

    /// Fire-and-forget persistence to the durable store and edge cache
    fn persist_async(
        &self,
        url: String,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        content_type: String,
        ttl: u32,
    ) {
        let store = self.store.clone();
        let edge = self.edge.clone();
        let metadata = CacheEntryMetadata::new(
            url.clone(),
            content_type,
            body.len() as u64,
            status.as_u16(),
            ttl,
            self.config.store_indefinitely,
        );

        tokio::spawn(async move {
            if store.put(&url, body.clone(), &metadata).await {
                info!(url = %url, ttl = ttl, "persisted to durable store");
            } else {
                warn!(url = %url, "durable store persistence failed");
            }
            edge.store(&url, CachedResponse::new(status, headers, body))
                .await;
        });
    }
}
