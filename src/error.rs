//! Error types for the media edge cache

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types that can occur in the edge cache
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Durable store error: {0}")]
    StoreError(String),

    #[error("Durable store rate limited: {0}")]
    RateLimited(String),

    #[error("Durable store write conflict: {0}")]
    WriteConflict(String),

    #[error("Edge cache error: {0}")]
    EdgeCacheError(String),

    #[error("Origin fetch error: {0}")]
    OriginError(String),

    #[error("Invalid byte range: {0}")]
    InvalidRange(String),

    #[error("Unsatisfiable range: {0}")]
    UnsatisfiableRange(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Metadata error: {0}")]
    MetadataError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err.to_string())
    }
}

impl CacheError {
    /// Determine if this error is transient and worth retrying
    ///
    /// Transient errors are backend signals that tend to clear on their own:
    /// rate limiting, write conflicts from concurrent writers, timeouts and
    /// IO hiccups. Everything else is permanent for the current operation:
    /// malformed input, configuration problems, metadata corruption.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::RateLimited(_) => true,
            CacheError::WriteConflict(_) => true,
            CacheError::Timeout(_) => true,
            CacheError::IoError(_) => true,

            CacheError::StoreError(_) => false,
            CacheError::EdgeCacheError(_) => false,
            CacheError::OriginError(_) => false,
            CacheError::ConfigError(_) => false,
            CacheError::InvalidRange(_) => false,
            CacheError::UnsatisfiableRange(_) => false,
            CacheError::StreamError(_) => false,
            CacheError::MetadataError(_) => false,
            CacheError::ParseError(_) => false,
            CacheError::InternalError(_) => false,
        }
    }

    /// Convert error to HTTP status code
    ///
    /// Only two error families ever reach the client: unsatisfiable ranges
    /// (416) and origin failures (502/504). Cache and refresh failures are
    /// recovered locally and never mapped to a response.
    pub fn to_http_status(&self) -> u16 {
        match self {
            CacheError::InvalidRange(_) => 416,
            CacheError::UnsatisfiableRange(_) => 416,
            CacheError::ParseError(_) => 400,

            CacheError::OriginError(_) => 502,
            CacheError::Timeout(_) => 504,

            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CacheError::RateLimited("429".into()).is_transient());
        assert!(CacheError::WriteConflict("cas".into()).is_transient());
        assert!(CacheError::Timeout("slow".into()).is_transient());
        assert!(!CacheError::StoreError("boom".into()).is_transient());
        assert!(!CacheError::ConfigError("bad".into()).is_transient());
        assert!(!CacheError::UnsatisfiableRange("2000-3000".into()).is_transient());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(CacheError::UnsatisfiableRange("x".into()).to_http_status(), 416);
        assert_eq!(CacheError::OriginError("down".into()).to_http_status(), 502);
        assert_eq!(CacheError::Timeout("slow".into()).to_http_status(), 504);
        assert_eq!(CacheError::InternalError("x".into()).to_http_status(), 500);
    }
}
