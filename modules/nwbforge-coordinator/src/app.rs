//! Process wiring. One explicit state value constructed at startup and
//! passed to every handler; no module-global singletons.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use nwbforge_common::{Config, NwbforgeError};

use crate::api;
use crate::context::{ContextStore, SessionCache};
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;
use crate::workflow::WorkflowEngine;

pub struct AppState {
    pub config: Config,
    pub store: Arc<ContextStore>,
    pub registry: Arc<AgentRegistry>,
    pub router: Arc<MessageRouter>,
    pub engine: WorkflowEngine,
}

impl AppState {
    pub fn new(config: Config, cache: Box<dyn SessionCache>) -> Result<Self, NwbforgeError> {
        let store = Arc::new(ContextStore::new(
            cache,
            &config.session_base_path,
            config.redis_session_ttl_secs,
        ));
        let registry = Arc::new(AgentRegistry::new());
        let router = Arc::new(MessageRouter::new(registry.clone())?);
        let engine = WorkflowEngine::new(store.clone(), registry.clone(), router.clone());
        Ok(Self {
            config,
            store,
            registry,
            router,
            engine,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(api::health::health_check))
        // Public session lifecycle
        .route("/api/v1/sessions/initialize", post(api::sessions::initialize_session))
        .route("/api/v1/sessions/{session_id}/status", get(api::sessions::session_status))
        .route("/api/v1/sessions/{session_id}/clarify", post(api::sessions::clarify_session))
        .route("/api/v1/sessions/{session_id}/result", get(api::sessions::session_result))
        // Artifact downloads
        .route("/api/v1/downloads/nwb/{filename}", get(api::downloads::download_nwb))
        .route("/api/v1/downloads/report/{filename}", get(api::downloads::download_report))
        // Internal (worker-facing)
        .route("/internal/register_agent", post(api::internal::register_agent))
        .route(
            "/internal/sessions/{session_id}/context",
            get(api::internal::get_session_context).patch(api::internal::update_session_context),
        )
        .route("/internal/route_message", post(api::internal::route_message))
        .with_state(state)
        // Logging layer: method + path + status only
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
