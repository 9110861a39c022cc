//! Media Edge Cache demo entry point
//!
//! Loads configuration, sets up logging, and wires the read-through
//! engine against in-memory backends to exercise a few requests.

use std::env;
use std::sync::Arc;

use media_edge_cache::{
    CacheConfig, HttpOrigin, MediaRequest, MemoryEdgeCache, MemoryKvBackend, ReadThrough,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Media Edge Cache");

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "media_edge_cache.yaml".to_string());

    let config = match CacheConfig::from_file(&config_path) {
        Ok(cfg) => {
            info!("Configuration loaded from {}", config_path);
            cfg
        }
        Err(e) => {
            info!(
                "Could not load {} ({}), falling back to defaults",
                config_path, e
            );
            CacheConfig::default()
        }
    };

    info!("  - TTL (2xx): {} seconds", config.ttl.ok);
    info!("  - TTL profiles: {}", config.profiles.len());
    info!(
        "  - Refresh thresholds: {}% elapsed / {}s remaining",
        config.refresh.min_elapsed_percent, config.refresh.min_remaining_seconds
    );
    info!("  - Store indefinitely: {}", config.store_indefinitely);
    info!("  - Cacheable types: {:?}", config.cacheable_types);

    let config = Arc::new(config);
    let origin = match HttpOrigin::new(&config) {
        Ok(origin) => origin,
        Err(e) => {
            error!("Failed to build origin client: {}", e);
            std::process::exit(1);
        }
    };

    let engine = ReadThrough::new(
        config,
        Arc::new(MemoryKvBackend::new()),
        Arc::new(MemoryEdgeCache::new()),
    );
    info!("Read-through engine initialized");

    // Resolve any URLs passed after the config path, as a smoke test
    for url in env::args().skip(2) {
        let request = MediaRequest::get(&url);
        let response = engine.handle(&request, &origin).await;
        info!(
            "{} -> {} ({} bytes)",
            url,
            response.status,
            response.content_length().unwrap_or(0)
        );
    }

    info!("Done");
}
