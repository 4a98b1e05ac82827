//! Image Previewer - on-demand thumbnail service
//!
//! Serves `/fill/{width}/{height}/{source}` with an LRU disk cache.

use image_previewer::{
    log_filter, shutdown_signal, start_server, Config, ImageTransform, Pipeline, RemoteFetcher,
    Result, ServerState, SharedState,
};
use lru_file_cache::{purge_orphans, CacheIndex};
use std::sync::Arc;
use tokio::fs;
use tracing::info;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize logging; RUST_LOG replaces the default directives
    let rust_log = std::env::var("RUST_LOG").ok();
    let env_filter = log_filter(rust_log.as_deref())?;

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if config.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Image Previewer...");
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache size: {} items", config.cache_size);
    info!("Max source size: {} bytes", config.max_source_bytes);
    info!(
        "Request timeout: {}s, shutdown timeout: {}s",
        config.request_timeout.as_secs(),
        config.shutdown_timeout.as_secs()
    );

    // The index starts empty, so files from a previous run are unreachable
    if config.purge_on_start {
        purge_orphans(&config.cache_dir).await?;
    } else {
        fs::create_dir_all(&config.cache_dir).await?;
    }

    let cache = Arc::new(CacheIndex::new(config.cache_size));
    let pipeline = Pipeline::new(
        cache,
        RemoteFetcher::new().with_max_body_bytes(config.max_source_bytes),
        ImageTransform::new(),
        config.cache_dir.clone(),
        config.max_dimension,
    );

    // Create shared state
    let state: SharedState = Arc::new(ServerState::new(pipeline, config.request_timeout));

    // Serve until SIGINT/SIGTERM, then drain
    start_server(state, config.port, shutdown_signal(), config.shutdown_timeout).await?;

    info!("Server stopped");
    Ok(())
}
