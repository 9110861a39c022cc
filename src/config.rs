//! Configuration management for the media edge cache

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Per-status-class TTLs in seconds
///
/// The field defaults double as the hardcoded floors the resolver falls
/// back to when neither a profile nor the loaded configuration provides a
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// TTL for 2xx responses (default: 300)
    #[serde(default = "default_ttl_ok")]
    pub ok: u32,

    /// TTL for 3xx responses (default: 300)
    #[serde(default = "default_ttl_redirects")]
    pub redirects: u32,

    /// TTL for 4xx responses (default: 60)
    #[serde(default = "default_ttl_client_error")]
    pub client_error: u32,

    /// TTL for 5xx responses (default: 10)
    #[serde(default = "default_ttl_server_error")]
    pub server_error: u32,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy {
            ok: default_ttl_ok(),
            redirects: default_ttl_redirects(),
            client_error: default_ttl_client_error(),
            server_error: default_ttl_server_error(),
        }
    }
}

/// Partial per-status-class TTLs used by path profiles
///
/// Unset fields fall through to the next tier of the resolution chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlOverrides {
    #[serde(default)]
    pub ok: Option<u32>,
    #[serde(default)]
    pub redirects: Option<u32>,
    #[serde(default)]
    pub client_error: Option<u32>,
    #[serde(default)]
    pub server_error: Option<u32>,
}

/// A path-scoped TTL profile
///
/// Profiles are consulted in declaration order; the first profile with a
/// regex matching the request path wins. The profile named `default` is
/// the fallback for unmatched paths and is never matched by path itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlProfileConfig {
    /// Profile name; `default` designates the fallback profile
    pub name: String,

    /// Path regexes, tried in order
    #[serde(default)]
    pub patterns: Vec<String>,

    /// TTL overrides this profile contributes
    #[serde(default)]
    pub ttl: TtlOverrides,
}

/// Thresholds governing metadata-only TTL refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Skip refresh until this share of the original TTL has elapsed
    /// (default: 10)
    #[serde(default = "default_min_elapsed_percent")]
    pub min_elapsed_percent: u32,

    /// Skip refresh when less than this many seconds remain (default: 60)
    #[serde(default = "default_min_remaining_seconds")]
    pub min_remaining_seconds: u32,

    /// Original TTL assumed for records without an advertised expiry
    /// (default: 3600)
    #[serde(default = "default_refresh_fallback_ttl")]
    pub default_ttl_seconds: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            min_elapsed_percent: default_min_elapsed_percent(),
            min_remaining_seconds: default_min_remaining_seconds(),
            default_ttl_seconds: default_refresh_fallback_ttl(),
        }
    }
}

/// Retry/backoff settings for transient durable-store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in milliseconds, doubled per attempt (default: 200)
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Backoff ceiling in milliseconds (default: 2000)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Configuration for the media edge cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Global per-status-class TTLs
    #[serde(default)]
    pub ttl: TtlPolicy,

    /// Path-scoped TTL profiles, highest priority first
    #[serde(default)]
    pub profiles: Vec<TtlProfileConfig>,

    /// TTL refresh thresholds
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Retry policy for transient store failures
    #[serde(default)]
    pub retry: RetrySettings,

    /// When set, durable records never backend-expire; the advertised
    /// `expires_at` is still computed so HTTP freshness counts down
    #[serde(default)]
    pub store_indefinitely: bool,

    /// Whether TTL refresh also applies to indefinitely stored entries
    #[serde(default)]
    pub refresh_indefinite_storage: bool,

    /// Content-type prefixes eligible for persistence (default:
    /// `video/`, `image/`)
    #[serde(default = "default_cacheable_types")]
    pub cacheable_types: Vec<String>,

    /// Origin fetch timeout in seconds (default: 30)
    #[serde(default = "default_origin_timeout_secs")]
    pub origin_timeout_secs: u64,
}

// Default value functions for serde
fn default_ttl_ok() -> u32 {
    300
}

fn default_ttl_redirects() -> u32 {
    300
}

fn default_ttl_client_error() -> u32 {
    60
}

fn default_ttl_server_error() -> u32 {
    10
}

fn default_min_elapsed_percent() -> u32 {
    10
}

fn default_min_remaining_seconds() -> u32 {
    60
}

fn default_refresh_fallback_ttl() -> u32 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_cacheable_types() -> Vec<String> {
    vec!["video/".to_string(), "image/".to_string()]
}

fn default_origin_timeout_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl: TtlPolicy::default(),
            profiles: Vec::new(),
            refresh: RefreshConfig::default(),
            retry: RetrySettings::default(),
            store_indefinitely: false,
            refresh_indefinite_storage: false,
            cacheable_types: default_cacheable_types(),
            origin_timeout_secs: default_origin_timeout_secs(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            CacheError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: CacheConfig = serde_yaml::from_str(&content).map_err(|e| {
            CacheError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - `refresh.min_elapsed_percent` must be <= 100
    /// - `retry.max_attempts` must be >= 1
    /// - `retry.base_backoff_ms` must be > 0 and <= `retry.max_backoff_ms`
    /// - profile names must be non-empty; non-default profiles need at
    ///   least one pattern
    /// - `cacheable_types` must be non-empty
    pub fn validate(&self) -> Result<()> {
        if self.refresh.min_elapsed_percent > 100 {
            return Err(CacheError::ConfigError(format!(
                "refresh.min_elapsed_percent must be <= 100, got {}",
                self.refresh.min_elapsed_percent
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(CacheError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.base_backoff_ms == 0 {
            return Err(CacheError::ConfigError(
                "retry.base_backoff_ms must be greater than 0".to_string(),
            ));
        }

        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(CacheError::ConfigError(format!(
                "retry.base_backoff_ms ({}) must not exceed retry.max_backoff_ms ({})",
                self.retry.base_backoff_ms, self.retry.max_backoff_ms
            )));
        }

        for profile in &self.profiles {
            if profile.name.is_empty() {
                return Err(CacheError::ConfigError(
                    "profile name must not be empty".to_string(),
                ));
            }
            if profile.name != "default" && profile.patterns.is_empty() {
                return Err(CacheError::ConfigError(format!(
                    "profile '{}' must declare at least one path pattern",
                    profile.name
                )));
            }
        }

        if self.cacheable_types.is_empty() {
            return Err(CacheError::ConfigError(
                "cacheable_types must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
