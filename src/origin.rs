//! Origin fetch
//!
//! The orchestrator is handed an [`OriginFetch`] capability rather than a
//! concrete client, which keeps the read-through path testable against
//! in-process fakes. [`HttpOrigin`] is the production implementation on
//! top of `reqwest`, streaming response bodies chunk by chunk.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::models::{Body, MediaRequest, MediaResponse};

/// Capability to fetch a resource from the upstream origin
#[async_trait]
pub trait OriginFetch: Send + Sync {
    async fn fetch(&self, request: &MediaRequest) -> Result<MediaResponse>;
}

/// HTTP origin client
pub struct HttpOrigin {
    client: reqwest::Client,
}

impl HttpOrigin {
    /// Build a client with the configured request timeout
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.origin_timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CacheError::OriginError(format!("failed to build client: {}", e)))?;
        Ok(HttpOrigin { client })
    }
}

#[async_trait]
impl OriginFetch for HttpOrigin {
    async fn fetch(&self, request: &MediaRequest) -> Result<MediaResponse> {
        debug!(method = %request.method, url = %request.url, "fetching from origin");

        let builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        let mut upstream = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CacheError::Timeout(format!("origin fetch timed out: {}", e))
            } else {
                CacheError::OriginError(format!("origin fetch failed: {}", e))
            }
        })?;

        let status =
            StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let headers = upstream.headers().clone();

        // Stream the body; the receiver side sees chunks as they arrive
        let (tx, body) = Body::channel(16);
        tokio::spawn(async move {
            loop {
                match upstream.chunk().await {
                    Ok(Some(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            // Consumer dropped the response
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, "origin body stream failed");
                        let _ = tx
                            .send(Err(CacheError::OriginError(format!(
                                "origin body stream failed: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(MediaResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    #[test]
    fn test_client_builds_from_default_config() {
        let config = CacheConfig::default();
        assert!(HttpOrigin::new(&config).is_ok());
    }
}
