use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nwbforge_common::Config;
use nwbforge_coordinator::context::RedisCache;
use nwbforge_coordinator::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nwbforge=info".parse()?))
        .init();

    let config = Config::coordinator_from_env();

    // Startup order: cache first (a dead cache means the store is not
    // connected and serving would only report unhealthy), then registry and
    // router, then the REST surface.
    let cache = RedisCache::connect(&config.redis_url)
        .await
        .map_err(|e| anyhow::anyhow!("cache connection failed at startup: {e}"))?;

    let addr = format!("{}:{}", config.coordinator_host, config.coordinator_port);
    let state = Arc::new(AppState::new(config, Box::new(cache))?);
    let app = build_router(state);

    info!("nwbforge coordinator starting on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router's HTTP pool and the cache connection close with their
    // owners; in-flight dispatches are allowed to fail on the worker side.
    info!("nwbforge coordinator shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    }
}
