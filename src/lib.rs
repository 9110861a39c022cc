//! Media Edge Cache
//!
//! A read-through caching and HTTP Range-serving engine for transformed
//! media (video and image renditions). Requests are resolved against a
//! fast but eventually-consistent edge cache, then a durable key-value
//! store, and finally the upstream origin, with byte-range extraction
//! applied at whichever layer produced the response.
//!
//! # Overview
//!
//! The engine transparently handles `Range: bytes=...` requests against
//! cached full-resource entries: a range-aware edge backend may slice for
//! us, a durable-store hit is sliced locally, and on a full miss the range
//! is extracted from the freshly fetched origin response. Partial-content
//! responses are never stored.
//!
//! # Features
//!
//! - **Byte-range serving**: closed, open and suffix forms, with a strict
//!   distinction between malformed headers (serve 200) and unsatisfiable
//!   ones (serve 416)
//! - **Consistency fallback chain**: range-scoped, full-resource and
//!   fully-keyed lookups attempted strictly in order
//! - **Metadata-only TTL refresh**: sliding expiry renewal without
//!   re-uploading large payloads, with elapsed/remaining thresholds
//! - **Policy-driven TTLs**: per status class, with regex path profiles
//! - **Indefinite storage**: backend records that never expire while the
//!   advertised `Cache-Control` freshness still counts down
//! - **Retry with backoff**: transient store errors retried with capped
//!   exponential backoff
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use media_edge_cache::{CacheConfig, MediaRequest, MemoryEdgeCache, MemoryKvBackend, ReadThrough};
//! use std::sync::Arc;
//!
//! # async fn run(origin: impl media_edge_cache::OriginFetch) {
//! let config = Arc::new(CacheConfig::default());
//! let engine = ReadThrough::new(
//!     config,
//!     Arc::new(MemoryKvBackend::new()),
//!     Arc::new(MemoryEdgeCache::new()),
//! );
//!
//! let request = MediaRequest::get("https://cdn.example.com/v.mp4")
//!     .with_header(http::header::RANGE, "bytes=0-1023");
//! let response = engine.handle(&request, &origin).await;
//! println!("status: {}", response.status);
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`ReadThrough`]: top-level coordinator for a single request
//! - [`RangeSpec`]: validated byte windows parsed from `Range` headers
//! - [`TtlResolver`]: TTL selection by status class and path profile
//! - [`CacheEntryStore`]: durable entries over a [`KvBackend`], with
//!   retry and metadata-only refresh
//! - [`TtlRefresher`]: background sliding-expiry renewal
//! - [`RangeExtractor`]: buffered and streaming window extraction
//! - [`EdgeCacheAdapter`]: fallback chain over an [`EdgeCache`] backend
//! - [`HttpOrigin`]: upstream fetch over HTTP

pub mod config;
pub mod edge_cache;
pub mod error;
pub mod extractor;
pub mod headers;
pub mod models;
pub mod orchestrator;
pub mod origin;
pub mod refresher;
pub mod store;
pub mod ttl_policy;

pub use config::{
    CacheConfig, RefreshConfig, RetrySettings, TtlOverrides, TtlPolicy, TtlProfileConfig,
};
pub use edge_cache::{CachedResponse, EdgeCache, EdgeCacheAdapter, EdgeKey, MemoryEdgeCache};
pub use error::{CacheError, Result};
pub use extractor::RangeExtractor;
pub use models::{
    Body, CacheEntry, CacheEntryMetadata, MediaRequest, MediaResponse, RangeOutcome, RangeSpec,
};
pub use orchestrator::ReadThrough;
pub use origin::{HttpOrigin, OriginFetch};
pub use refresher::TtlRefresher;
pub use store::{CacheEntryStore, KvBackend, KvRecord, MemoryKvBackend, RetryPolicy};
pub use ttl_policy::TtlResolver;
