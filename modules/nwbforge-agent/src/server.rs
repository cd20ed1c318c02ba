//! The local HTTP surface every worker exposes: `POST /mcp/message` hands
//! the envelope to the worker's handler, `GET /health` reports liveness.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tracing::info;

use nwbforge_common::{AgentKind, McpMessage};

use crate::handler::MessageHandler;

#[derive(Clone)]
struct AgentState {
    name: String,
    kind: AgentKind,
    handler: Arc<dyn MessageHandler>,
}

pub fn build_router(
    name: impl Into<String>,
    kind: AgentKind,
    handler: Arc<dyn MessageHandler>,
) -> Router {
    let state = AgentState {
        name: name.into(),
        kind,
        handler,
    };
    Router::new()
        .route("/mcp/message", post(receive_message))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn receive_message(
    State(state): State<AgentState>,
    Json(message): Json<McpMessage>,
) -> Json<Value> {
    info!(
        agent = %state.name,
        kind = %message.message_kind,
        message_id = %message.message_id,
        session_id = message.session_id.as_deref().unwrap_or(""),
        "received message"
    );
    let reply = state.handler.handle(message).await;
    info!(
        agent = %state.name,
        status = reply.get("status").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
        "message processed"
    );
    Json(reply)
}

async fn health_check(State(state): State<AgentState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "agent_name": state.name,
        "agent_kind": state.kind,
    }))
}

/// Bind and serve until the process is stopped.
pub async fn serve(
    name: impl Into<String>,
    kind: AgentKind,
    port: u16,
    handler: Arc<dyn MessageHandler>,
) -> anyhow::Result<()> {
    let name = name.into();
    let router = build_router(name.clone(), kind, handler);
    let addr = format!("0.0.0.0:{port}");
    info!(agent = %name, %addr, "agent server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
