//! Fire-and-forget TTL refresh on the read path
//!
//! Refresh is best-effort freshness maintenance, not correctness-critical:
//! it never blocks a response and its failures never fail a request.

use crate::config::CacheConfig;
use crate::models::{now_ms, CacheEntryMetadata};
use crate::store::{refresh_due, CacheEntryStore};
use std::sync::Arc;
use tracing::debug;

/// Decides whether an entry's TTL should be renewed and performs the
/// metadata-only update, synchronously or in the background
pub struct TtlRefresher {
    store: Arc<CacheEntryStore>,
    config: Arc<CacheConfig>,
}

impl TtlRefresher {
    pub fn new(store: Arc<CacheEntryStore>, config: Arc<CacheConfig>) -> Self {
        TtlRefresher { store, config }
    }

    /// Possibly refresh an entry's TTL; returns whether a refresh was
    /// initiated
    ///
    /// In background mode the refresh is spawned and `true` is returned
    /// immediately once the thresholds clear, without waiting for the
    /// backend. Otherwise the refresh runs inline and the actual outcome
    /// is returned.
    pub async fn maybe_refresh(&self, metadata: &CacheEntryMetadata, background: bool) -> bool {
        let now = now_ms();
        let elapsed = metadata.elapsed_seconds(now);
        let remaining = metadata.remaining_seconds(now);
        let original_ttl = metadata.original_ttl_seconds(self.config.refresh.default_ttl_seconds);

        if !refresh_due(original_ttl, elapsed, remaining, &self.config.refresh) {
            debug!(
                "Refresh not due: key={}, elapsed={}s, remaining={}s",
                metadata.key, elapsed, remaining
            );
            return false;
        }

        if background {
            debug!("Refresh scheduled in background: key={}", metadata.key);
            let store = self.store.clone();
            let metadata = metadata.clone();
            tokio::spawn(async move {
                store
                    .refresh_ttl(&metadata.key, &metadata, original_ttl, elapsed, remaining)
                    .await;
            });
            return true;
        }

        self.store
            .refresh_ttl(&metadata.key, metadata, original_ttl, elapsed, remaining)
            .await
    }
}
