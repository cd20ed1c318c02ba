//! End-to-end scenarios against an in-process coordinator and real workers
//! on ephemeral ports: happy path, bad input, unknown session, premature
//! result, the clarification loop, registry + routing, and downloads.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use nwbforge_agent::workers::{ConversionWorker, EvaluationWorker, MetadataWorker};
use nwbforge_agent::{CoordinatorClient, MessageHandler};
use nwbforge_common::{AgentKind, Config};
use nwbforge_coordinator::context::MemoryCache;
use nwbforge_coordinator::{build_router, AppState};

struct Cluster {
    base: String,
    http: reqwest::Client,
    output_dir: TempDir,
    _session_dir: TempDir,
}

async fn spawn_coordinator() -> Cluster {
    let session_dir = tempfile::tempdir().expect("session dir");
    let output_dir = tempfile::tempdir().expect("output dir");

    let config = Config {
        redis_url: "redis://unused-in-tests".to_string(),
        redis_session_ttl_secs: 3600,
        session_base_path: session_dir.path().display().to_string(),
        output_base_path: output_dir.path().display().to_string(),
        coordinator_host: "127.0.0.1".to_string(),
        coordinator_port: 0,
        metadata_agent_port: 0,
        conversion_agent_port: 0,
        evaluation_agent_port: 0,
    };

    let state = Arc::new(AppState::new(config, Box::new(MemoryCache::new())).expect("state"));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve coordinator");
    });

    Cluster {
        base: format!("http://{addr}"),
        http: reqwest::Client::new(),
        output_dir,
        _session_dir: session_dir,
    }
}

impl Cluster {
    /// Spawn one worker of the given kind and self-register it over the
    /// internal API, the same way the agent binary does on boot.
    async fn spawn_worker(&self, kind: AgentKind) {
        let client = CoordinatorClient::new(&self.base).expect("client");
        let output_base = self.output_dir.path().to_path_buf();
        let handler: Arc<dyn MessageHandler> = match kind {
            AgentKind::Metadata => Arc::new(MetadataWorker::new(client.clone(), None)),
            AgentKind::Conversion => Arc::new(ConversionWorker::new(client.clone(), &output_base)),
            AgentKind::Evaluation => {
                Arc::new(EvaluationWorker::new(client.clone(), &output_base, None))
            }
        };

        let name = kind.agent_name();
        let router = nwbforge_agent::server::build_router(name, kind, handler.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind worker");
        let addr = listener.local_addr().expect("worker addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve worker");
        });

        let response = self
            .http
            .post(format!("{}/internal/register_agent", self.base))
            .json(&json!({
                "name": name,
                "kind": kind,
                "base_url": format!("http://{addr}"),
                "capabilities": handler.capabilities(),
            }))
            .send()
            .await
            .expect("register");
        assert_eq!(response.status(), 200);
    }

    async fn initialize(&self, dataset_path: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/api/v1/sessions/initialize", self.base))
            .json(&json!({ "dataset_path": dataset_path }))
            .send()
            .await
            .expect("initialize request")
    }

    async fn status(&self, session_id: &str) -> (u16, Value) {
        let response = self
            .http
            .get(format!("{}/api/v1/sessions/{session_id}/status", self.base))
            .send()
            .await
            .expect("status request");
        let code = response.status().as_u16();
        (code, response.json().await.unwrap_or(Value::Null))
    }

    /// Poll status until `done` returns true, recording every observed stage.
    async fn poll_until(
        &self,
        session_id: &str,
        done: impl Fn(&Value) -> bool,
    ) -> Vec<String> {
        let mut observed = Vec::new();
        for _ in 0..400 {
            let (code, body) = self.status(session_id).await;
            assert_eq!(code, 200, "status must stay reachable while polling");
            if let Some(stage) = body["workflow_stage"].as_str() {
                if observed.last().map(String::as_str) != Some(stage) {
                    observed.push(stage.to_string());
                }
            }
            if done(&body) {
                return observed;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("session {session_id} never reached the expected state; saw stages {observed:?}");
    }
}

fn write_dataset(with_subject: bool) -> TempDir {
    let dir = tempfile::tempdir().expect("dataset dir");
    std::fs::write(dir.path().join("structure.oebin"), "{}").unwrap();
    std::fs::write(dir.path().join("continuous.dat"), vec![0u8; 256]).unwrap();
    let notes = if with_subject {
        "subject_id: mouse_001\nspecies: Mus musculus\nexperimenter: R. Chen\n\
         device_name: Neuropixels 1.0\nsession_start_time: 2024-03-01T10:30:00\n\
         description: chronic CA1 recording\nrecording_location: CA1\n"
    } else {
        "species: Mus musculus\nexperimenter: R. Chen\n"
    };
    std::fs::write(dir.path().join("metadata.md"), notes).unwrap();
    dir
}

/// Index within the happy-path stage order; FAILED sits outside it.
fn stage_rank(stage: &str) -> Option<usize> {
    ["initialized", "collecting_metadata", "converting", "evaluating", "completed"]
        .iter()
        .position(|s| *s == stage)
}

// --- S1: happy path ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path_runs_to_completed_with_results() {
    let cluster = spawn_coordinator().await;
    cluster.spawn_worker(AgentKind::Metadata).await;
    cluster.spawn_worker(AgentKind::Conversion).await;
    cluster.spawn_worker(AgentKind::Evaluation).await;

    let dataset = write_dataset(true);
    let response = cluster.initialize(dataset.path().to_str().unwrap()).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();
    uuid::Uuid::parse_str(&session_id).expect("session_id is a UUID");
    assert_eq!(body["workflow_stage"], "initialized");

    let observed = cluster
        .poll_until(&session_id, |s| s["workflow_stage"] == "completed")
        .await;

    // Stage monotonicity: every observed stage is a non-decreasing step of
    // the happy-path order.
    let mut last_rank = 0;
    for stage in &observed {
        let rank = stage_rank(stage).unwrap_or_else(|| panic!("unexpected stage {stage}"));
        assert!(rank >= last_rank, "stage went backwards: {observed:?}");
        last_rank = rank;
    }

    // Progress projection at the terminal stage.
    let (_, status) = cluster.status(&session_id).await;
    assert_eq!(status["progress_percentage"], 100);
    assert_eq!(status["requires_clarification"], false);

    let result: Value = cluster
        .http
        .get(format!("{}/api/v1/sessions/{session_id}/result", cluster.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let overall = result["overall_status"].as_str().unwrap();
    assert!(
        overall == "passed" || overall == "passed_with_warnings",
        "unexpected overall_status: {overall}"
    );
    let nwb_path = result["nwb_file_path"].as_str().unwrap();
    let report_path = result["validation_report_path"].as_str().unwrap();
    assert!(!nwb_path.is_empty());
    assert!(!report_path.is_empty());
    assert!(std::path::Path::new(nwb_path).is_file());
    assert!(std::path::Path::new(report_path).is_file());
    assert!(!result["llm_validation_summary"].as_str().unwrap().is_empty());

    // Artifacts are downloadable through the download endpoints.
    let filename = std::path::Path::new(nwb_path).file_name().unwrap().to_str().unwrap();
    let download = cluster
        .http
        .get(format!("{}/api/v1/downloads/nwb/{filename}", cluster.base))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), 200);
    assert!(!download.bytes().await.unwrap().is_empty());

    // Traversal-shaped filenames are rejected up front.
    let traversal = cluster
        .http
        .get(format!("{}/api/v1/downloads/report/evil..name.json", cluster.base))
        .send()
        .await
        .unwrap();
    assert_eq!(traversal.status(), 400);
}

// --- S2: bad dataset path ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bad_dataset_path_is_rejected_without_creating_a_session() {
    let cluster = spawn_coordinator().await;

    let response = cluster.initialize("/does/not/exist").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("not found"));

    // No session backup was written.
    let sessions_dir = cluster._session_dir.path().join("sessions");
    let backups = std::fs::read_dir(&sessions_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(backups, 0);
}

// --- S3: unknown session ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_session_status_is_404() {
    let cluster = spawn_coordinator().await;
    let (code, body) = cluster.status("7f0f4f5e-9a1f-4f6e-a2af-63c5ffe82001").await;
    assert_eq!(code, 404);
    assert!(body["detail"].as_str().unwrap().contains("not found"));
}

// --- S4: premature result ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn result_before_completion_is_400() {
    let cluster = spawn_coordinator().await;
    // Only the metadata worker: the pipeline stalls after extraction because
    // the conversion dispatch has no registered target.
    cluster.spawn_worker(AgentKind::Metadata).await;

    let dataset = write_dataset(true);
    let response = cluster.initialize(dataset.path().to_str().unwrap()).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let session_id = body["session_id"].as_str().unwrap();

    let result = cluster
        .http
        .get(format!("{}/api/v1/sessions/{session_id}/result", cluster.base))
        .send()
        .await
        .unwrap();
    assert_eq!(result.status(), 400);
    let body: Value = result.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("not completed"));
}

// --- S5: clarification loop ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clarification_recovers_a_failed_session() {
    let cluster = spawn_coordinator().await;
    cluster.spawn_worker(AgentKind::Metadata).await;
    cluster.spawn_worker(AgentKind::Conversion).await;
    cluster.spawn_worker(AgentKind::Evaluation).await;

    // Notes without a subject line: extraction cannot proceed.
    let dataset = write_dataset(false);
    let response = cluster.initialize(dataset.path().to_str().unwrap()).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();

    cluster
        .poll_until(&session_id, |s| s["requires_clarification"] == true)
        .await;

    let (_, status) = cluster.status(&session_id).await;
    assert_eq!(status["workflow_stage"], "failed");
    assert_eq!(status["progress_percentage"], 0);
    let prompt = status["clarification_prompt"].as_str().unwrap();
    assert!(prompt.contains("subject_id"), "prompt should name the missing field: {prompt}");

    let clarify = cluster
        .http
        .post(format!("{}/api/v1/sessions/{session_id}/clarify", cluster.base))
        .json(&json!({ "updated_metadata": { "subject_id": "mouse_001" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(clarify.status(), 200);

    let observed = cluster
        .poll_until(&session_id, |s| s["workflow_stage"] == "completed")
        .await;
    assert!(
        observed.iter().all(|stage| stage != "failed"),
        "session must not fall back to failed after clarification: {observed:?}"
    );

    let (_, status) = cluster.status(&session_id).await;
    assert_eq!(status["requires_clarification"], false);
    assert!(status["clarification_prompt"].is_null());
}

// --- Health with a dead cache ---

struct DownCache;

#[async_trait::async_trait]
impl nwbforge_coordinator::SessionCache for DownCache {
    async fn ping(&self) -> Result<(), nwbforge_common::NwbforgeError> {
        Err(nwbforge_common::NwbforgeError::Storage("cache is down".into()))
    }
    async fn set_with_ttl(
        &self,
        _key: &str,
        _value: &str,
        _ttl_secs: u64,
    ) -> Result<(), nwbforge_common::NwbforgeError> {
        Err(nwbforge_common::NwbforgeError::Storage("cache is down".into()))
    }
    async fn get(&self, _key: &str) -> Result<Option<String>, nwbforge_common::NwbforgeError> {
        Err(nwbforge_common::NwbforgeError::Storage("cache is down".into()))
    }
    async fn delete(&self, _key: &str) -> Result<(), nwbforge_common::NwbforgeError> {
        Err(nwbforge_common::NwbforgeError::Storage("cache is down".into()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_reports_unhealthy_when_cache_is_down() {
    let session_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let config = Config {
        redis_url: "redis://unused-in-tests".to_string(),
        redis_session_ttl_secs: 3600,
        session_base_path: session_dir.path().display().to_string(),
        output_base_path: output_dir.path().display().to_string(),
        coordinator_host: "127.0.0.1".to_string(),
        coordinator_port: 0,
        metadata_agent_port: 0,
        conversion_agent_port: 0,
        evaluation_agent_port: 0,
    };
    let state = Arc::new(AppState::new(config, Box::new(DownCache)).unwrap());
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["cache_connected"], false);

    // Storage failures surface as 5xx, not as silent data loss.
    let status = reqwest::get(format!("http://{addr}/api/v1/sessions/any-id/status"))
        .await
        .unwrap();
    assert_eq!(status.status(), 500);
}

// --- S6: registry + routing ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_and_routing_round_trip() {
    let cluster = spawn_coordinator().await;

    // Two stub workers that echo a fixed reply.
    let mut stub_urls = Vec::new();
    for _ in 0..2 {
        let router = Router::new().route(
            "/mcp/message",
            post(|| async { Json(json!({"status": "success", "echo": true})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        stub_urls.push(format!("http://{addr}"));
    }

    for (i, url) in stub_urls.iter().enumerate() {
        let response = cluster
            .http
            .post(format!("{}/internal/register_agent", cluster.base))
            .json(&json!({
                "name": format!("stub_agent_{i}"),
                "kind": "metadata",
                "base_url": url,
                "capabilities": ["echo"],
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "registered");
    }

    // Health reflects both names and the cache.
    let health: Value = cluster
        .http
        .get(format!("{}/health", cluster.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["cache_connected"], true);
    let agents: Vec<&str> = health["agents_registered"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(agents.contains(&"stub_agent_0") && agents.contains(&"stub_agent_1"));

    // Routing to an unknown target is 404.
    let missing = cluster
        .http
        .post(format!("{}/internal/route_message", cluster.base))
        .json(&json!({
            "target_agent": "nobody_home",
            "message_kind": "health_check",
            "payload": {},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    // Routing to a registered target passes the reply through.
    let routed = cluster
        .http
        .post(format!("{}/internal/route_message", cluster.base))
        .json(&json!({
            "target_agent": "stub_agent_0",
            "message_kind": "health_check",
            "payload": {},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(routed.status(), 200);
    let body: Value = routed.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["echo"], true);
}
