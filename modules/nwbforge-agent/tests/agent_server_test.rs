//! Worker HTTP surface: health shape, envelope dispatch, and rejection of
//! kinds and actions a worker does not own. Also the registration failure
//! path that aborts worker startup.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};

use nwbforge_agent::workers::MetadataWorker;
use nwbforge_agent::{CoordinatorClient, MessageHandler};
use nwbforge_common::{AgentKind, AgentRecord, NwbforgeError};

async fn spawn_metadata_worker() -> SocketAddr {
    // Points at a dead coordinator; the paths under test never reach it.
    let client = CoordinatorClient::new("http://127.0.0.1:9").expect("client");
    let handler: Arc<dyn MessageHandler> = Arc::new(MetadataWorker::new(client, None));
    let router = nwbforge_agent::server::build_router("metadata_agent", AgentKind::Metadata, handler);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

#[tokio::test]
async fn health_reports_name_and_kind() {
    let addr = spawn_metadata_worker().await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("health request")
        .json()
        .await
        .expect("health body");

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["agent_name"], "metadata_agent");
    assert_eq!(body["agent_kind"], "metadata");
}

#[tokio::test]
async fn foreign_action_is_rejected_with_error_status() {
    let addr = spawn_metadata_worker().await;
    let envelope = json!({
        "message_id": "m-1",
        "source_agent": "coordinator",
        "target_agent": "metadata_agent",
        "session_id": "s-1",
        "message_kind": "agent_execute",
        "payload": {"action": "convert_dataset", "session_id": "s-1"},
        "timestamp": "2024-03-01T10:30:00Z",
    });

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/message"))
        .json(&envelope)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("body");

    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("convert_dataset"));
}

#[tokio::test]
async fn unknown_action_is_rejected_at_parse_time() {
    let addr = spawn_metadata_worker().await;
    let envelope = json!({
        "message_id": "m-2",
        "source_agent": "coordinator",
        "target_agent": "metadata_agent",
        "session_id": "s-1",
        "message_kind": "agent_execute",
        "payload": {"action": "reticulate_splines", "session_id": "s-1"},
        "timestamp": "2024-03-01T10:30:00Z",
    });

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/message"))
        .json(&envelope)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("body");

    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("invalid execute payload"));
}

#[tokio::test]
async fn non_execute_kinds_are_rejected() {
    let addr = spawn_metadata_worker().await;
    let envelope = json!({
        "message_id": "m-3",
        "source_agent": "coordinator",
        "target_agent": "metadata_agent",
        "session_id": null,
        "message_kind": "context_update",
        "payload": {},
        "timestamp": "2024-03-01T10:30:00Z",
    });

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/message"))
        .json(&envelope)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("body");

    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("unsupported message kind"));
}

#[tokio::test]
async fn registration_against_a_dead_coordinator_fails() {
    // Bind-then-drop to find a port with no listener.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = CoordinatorClient::new(format!("http://{addr}")).expect("client");
    let record = AgentRecord {
        name: "metadata_agent".to_string(),
        kind: AgentKind::Metadata,
        base_url: "http://localhost:3001".to_string(),
        capabilities: vec!["initialize_session".to_string()],
    };

    let err = client.register(&record).await.unwrap_err();
    assert!(matches!(err, NwbforgeError::Transport(_)), "got: {err:?}");
}
