//! Internal endpoints for worker processes: self-registration, session
//! context access, and coordinator-mediated message routing. Not exposed
//! outside the deployment network; bodies never carry stack traces.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tracing::warn;

use nwbforge_common::api::{ContextUpdateResponse, RegisterAgentResponse, RouteMessageRequest};
use nwbforge_common::{AgentKind, AgentRecord, NwbforgeError};

use crate::api::error_response;
use crate::app::AppState;

/// Evaluation runs LLM summaries that can take minutes; routed dispatches to
/// it get a longer read timeout than the default 60 s.
const EVALUATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

pub async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(record): Json<AgentRecord>,
) -> Json<RegisterAgentResponse> {
    let name = record.name.clone();
    state.registry.register(record);
    Json(RegisterAgentResponse {
        status: "registered".to_string(),
        name,
    })
}

pub async fn get_session_context(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.get(&session_id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => error_response(NwbforgeError::NotFound(format!(
            "Session {session_id} not found"
        ))),
        Err(e) => {
            warn!(error = %e, session_id, "failed to load session context");
            error_response(e)
        }
    }
}

pub async fn update_session_context(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(overlay): Json<Value>,
) -> Response {
    match state.store.update(&session_id, &overlay).await {
        Ok(_) => Json(ContextUpdateResponse {
            status: "updated".to_string(),
            session_id,
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, session_id, "context update rejected");
            error_response(e)
        }
    }
}

pub async fn route_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RouteMessageRequest>,
) -> Response {
    let timeout = (request.target_agent == AgentKind::Evaluation.agent_name())
        .then_some(EVALUATION_TIMEOUT);
    match state
        .router
        .send_with_timeout(&request.target_agent, request.message_kind, request.payload, timeout)
        .await
    {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => {
            warn!(error = %e, target = %request.target_agent, "message routing failed");
            error_response(e)
        }
    }
}
