//! Durable cache entry storage over a KV-like backend
//!
//! The durable store is the authoritative tier: every entry is a value
//! plus a metadata object, with an optional backend-side TTL. Writes are
//! best-effort from the caller's point of view; backend failures are
//! retried when transient and otherwise swallowed with a warning, never
//! surfaced as request failures.

use crate::config::{CacheConfig, RefreshConfig, RetrySettings};
use crate::error::{CacheError, Result};
use crate::models::{CacheEntry, CacheEntryMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{debug, warn};

/// A raw record as stored by the backend
#[derive(Debug, Clone)]
pub struct KvRecord {
    pub value: Bytes,
    pub metadata: serde_json::Value,
}

/// Abstraction over the authoritative key-value backend
///
/// Contract: a `put` with an empty value for an existing key is a
/// metadata-only update; the backend must keep the stored value and only
/// replace the metadata and TTL. This is the mechanism that lets TTL
/// refresh avoid re-uploading large binary payloads.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Store or update a record; `ttl_seconds: None` means no backend expiry
    async fn put(
        &self,
        key: &str,
        value: Bytes,
        metadata: serde_json::Value,
        ttl_seconds: Option<u32>,
    ) -> Result<()>;

    /// Fetch a record, `None` on miss or backend expiry
    async fn get(&self, key: &str) -> Result<Option<KvRecord>>;

    /// Remove a record
    async fn delete(&self, key: &str) -> Result<()>;
}

struct StoredRecord {
    value: Bytes,
    metadata: serde_json::Value,
    expires_at: Option<SystemTime>,
}

/// In-memory `KvBackend` for tests and single-process deployments
pub struct MemoryKvBackend {
    records: Arc<RwLock<HashMap<String, StoredRecord>>>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        MemoryKvBackend {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of live records, ignoring expiry
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKvBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn put(
        &self,
        key: &str,
        value: Bytes,
        metadata: serde_json::Value,
        ttl_seconds: Option<u32>,
    ) -> Result<()> {
        let expires_at =
            ttl_seconds.map(|ttl| SystemTime::now() + Duration::from_secs(ttl as u64));
        let mut records = self
            .records
            .write()
            .map_err(|e| CacheError::StoreError(format!("lock poisoned: {}", e)))?;

        if value.is_empty() {
            // Metadata-only update. A missing key means the entry was
            // deleted or expired underneath the refresh; inserting here
            // would resurrect a record with no body, so drop the write.
            if let Some(existing) = records.get_mut(key) {
                existing.metadata = metadata;
                existing.expires_at = expires_at;
            }
            return Ok(());
        }

        records.insert(
            key.to_string(),
            StoredRecord {
                value,
                metadata,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<KvRecord>> {
        let now = SystemTime::now();
        let mut records = self
            .records
            .write()
            .map_err(|e| CacheError::StoreError(format!("lock poisoned: {}", e)))?;

        if let Some(record) = records.get(key) {
            if let Some(expires) = record.expires_at {
                if expires <= now {
                    records.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(KvRecord {
                value: record.value.clone(),
                metadata: record.metadata.clone(),
            }));
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|e| CacheError::StoreError(format!("lock poisoned: {}", e)))?;
        records.remove(key);
        Ok(())
    }
}

/// Retry policy for transient backend failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts,
            base_backoff_ms: settings.base_backoff_ms,
            max_backoff_ms: settings.max_backoff_ms,
        }
    }

    /// Whether another attempt should follow the given zero-based attempt
    pub fn should_retry(&self, attempt: u32, error: &CacheError) -> bool {
        attempt + 1 < self.max_attempts && error.is_transient()
    }

    /// Exponential backoff for a zero-based attempt, capped at the ceiling
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << attempt.min(10))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Whether a TTL refresh is due, per the configured thresholds
///
/// Refresh is skipped until at least `min_elapsed_percent` of the
/// original TTL has elapsed, and skipped outright when less than
/// `min_remaining_seconds` remain; both thresholds must clear.
pub fn refresh_due(
    original_ttl: u32,
    elapsed_seconds: u64,
    remaining_seconds: i64,
    refresh: &RefreshConfig,
) -> bool {
    let min_elapsed = original_ttl as u64 * refresh.min_elapsed_percent as u64 / 100;
    if elapsed_seconds < min_elapsed {
        return false;
    }
    if remaining_seconds < refresh.min_remaining_seconds as i64 {
        return false;
    }
    true
}

/// Counters for store activity
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub puts: u64,
    pub put_failures: u64,
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub refreshes_skipped: u64,
}

/// Durable key -> (body, metadata) store with expiry and TTL refresh
pub struct CacheEntryStore {
    backend: Arc<dyn KvBackend>,
    config: Arc<CacheConfig>,
    retry: RetryPolicy,
    stats: Arc<RwLock<StoreStats>>,
}

impl CacheEntryStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: Arc<CacheConfig>) -> Self {
        let retry = RetryPolicy::from_settings(&config.retry);
        CacheEntryStore {
            backend,
            config,
            retry,
            stats: Arc::new(RwLock::new(StoreStats::default())),
        }
    }

    /// Snapshot of store counters
    pub fn stats(&self) -> StoreStats {
        self.stats.read().map(|s| *s).unwrap_or_default()
    }

    fn bump<F: FnOnce(&mut StoreStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    /// Store an entry; returns whether the write landed
    ///
    /// Never errors to the caller: backend failures are retried when
    /// transient and reported as `false` otherwise. In indefinite-storage
    /// mode the backend TTL is omitted entirely while the metadata keeps
    /// its advertised `expires_at`.
    pub async fn put(&self, key: &str, body: Bytes, metadata: &CacheEntryMetadata) -> bool {
        let ttl = if metadata.store_indefinitely {
            None
        } else {
            Some(metadata.ttl_seconds)
        };

        let json = match serde_json::to_value(metadata) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize metadata for key={}: {}", key, e);
                self.bump(|s| s.put_failures += 1);
                return false;
            }
        };

        debug!(
            "Storing entry: key={}, bytes={}, ttl={:?}, indefinite={}",
            key,
            body.len(),
            ttl,
            metadata.store_indefinitely
        );

        let ok = self.put_with_retry(key, body, json, ttl).await;
        self.bump(|s| {
            if ok {
                s.puts += 1;
            } else {
                s.put_failures += 1;
            }
        });
        ok
    }

    /// Fetch an entry; `None` on miss, backend expiry, or backend error
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let record = match self.backend.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("Store miss: key={}", key);
                self.bump(|s| s.misses += 1);
                return None;
            }
            Err(e) => {
                warn!("Store lookup failed for key={}: {}", key, e);
                self.bump(|s| s.misses += 1);
                return None;
            }
        };

        let metadata: CacheEntryMetadata = match serde_json::from_value(record.metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Corrupt metadata for key={}: {}", key, e);
                self.bump(|s| s.misses += 1);
                return None;
            }
        };

        debug!(
            "Store hit: key={}, bytes={}, status={}",
            key,
            record.value.len(),
            metadata.status
        );
        self.bump(|s| s.hits += 1);
        Some(CacheEntry {
            metadata,
            body: record.value,
        })
    }

    /// Remove an entry; returns whether the backend accepted the delete
    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Store delete failed for key={}: {}", key, e);
                false
            }
        }
    }

    /// Metadata-only TTL renewal; the value payload is never re-sent
    ///
    /// Indefinite entries with refresh disabled report success with no
    /// backend call at all, whatever the thresholds say. Otherwise returns
    /// `false` without contacting the backend when the thresholds say the
    /// refresh is not yet worthwhile.
    pub async fn refresh_ttl(
        &self,
        key: &str,
        metadata: &CacheEntryMetadata,
        original_ttl: u32,
        elapsed_seconds: u64,
        remaining_seconds: i64,
    ) -> bool {
        if metadata.store_indefinitely && !self.config.refresh_indefinite_storage {
            debug!(
                "Refresh of indefinite entry disabled, reporting success: key={}",
                key
            );
            return true;
        }

        if !refresh_due(
            original_ttl,
            elapsed_seconds,
            remaining_seconds,
            &self.config.refresh,
        ) {
            debug!(
                "Refresh skipped: key={}, elapsed={}s, remaining={}s, ttl={}s",
                key, elapsed_seconds, remaining_seconds, original_ttl
            );
            self.bump(|s| s.refreshes_skipped += 1);
            return false;
        }

        let renewed = metadata.renewed(original_ttl);
        let ttl = if renewed.store_indefinitely {
            None
        } else {
            Some(original_ttl)
        };

        let json = match serde_json::to_value(&renewed) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize renewed metadata for key={}: {}", key, e);
                return false;
            }
        };

        debug!("Refreshing TTL: key={}, ttl={}s", key, original_ttl);
        let ok = self.put_with_retry(key, Bytes::new(), json, ttl).await;
        if ok {
            self.bump(|s| s.refreshes += 1);
        }
        ok
    }

    /// Sequential retry loop around a backend put
    ///
    /// Transient failures (rate limit, write conflict, timeout) back off
    /// exponentially up to the attempt budget; anything else fails fast.
    async fn put_with_retry(
        &self,
        key: &str,
        value: Bytes,
        metadata: serde_json::Value,
        ttl: Option<u32>,
    ) -> bool {
        let mut attempt = 0;
        loop {
            match self
                .backend
                .put(key, value.clone(), metadata.clone(), ttl)
                .await
            {
                Ok(()) => return true,
                Err(e) => {
                    if !self.retry.should_retry(attempt, &e) {
                        warn!(
                            "Store put failed for key={} after {} attempt(s): {}",
                            key,
                            attempt + 1,
                            e
                        );
                        return false;
                    }
                    let backoff = self.retry.backoff_duration(attempt);
                    warn!(
                        "Transient store failure for key={} (attempt {}), retrying after {:?}: {}",
                        key,
                        attempt + 1,
                        backoff,
                        e
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
