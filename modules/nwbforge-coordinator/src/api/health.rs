use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;

use nwbforge_common::api::HealthResponse;

use crate::app::AppState;

/// Liveness for monitoring: cache connectivity decides healthy/unhealthy,
/// and the registered agent names show which workers have checked in.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let cache_connected = state.store.cache_connected().await;
    let agents_registered = state
        .registry
        .list()
        .into_iter()
        .map(|record| record.name)
        .collect();

    Json(HealthResponse {
        status: if cache_connected { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        agents_registered,
        cache_connected,
    })
}
