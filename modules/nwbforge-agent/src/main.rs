use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use nwbforge_agent::workers::{ConversionWorker, EvaluationWorker, MetadataWorker};
use nwbforge_agent::{CoordinatorClient, LlmRunner, MessageHandler};
use nwbforge_common::{AgentConfig, AgentKind, AgentRecord};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nwbforge=info".parse()?))
        .init();

    let kind: AgentKind = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: agent <metadata|conversion|evaluation>"))?
        .parse()
        .map_err(|e| anyhow!("{e}. Valid kinds: metadata, conversion, evaluation"))?;

    let config = AgentConfig::from_env(kind);
    config.log_redacted();

    let client = CoordinatorClient::new(&config.coordinator_url)?;
    let llm = LlmRunner::from_config(&config);

    let handler: Arc<dyn MessageHandler> = match kind {
        AgentKind::Metadata => Arc::new(MetadataWorker::new(client.clone(), Some(llm))),
        AgentKind::Conversion => {
            Arc::new(ConversionWorker::new(client.clone(), &config.output_base_path))
        }
        AgentKind::Evaluation => Arc::new(EvaluationWorker::new(
            client.clone(),
            &config.output_base_path,
            Some(llm),
        )),
    };

    // Register before serving; an unregistered worker never receives work,
    // so a failure here aborts startup.
    let record = AgentRecord {
        name: config.agent_name.clone(),
        kind,
        // localhost, not the bind address: the coordinator dials back on the
        // loopback of the shared host.
        base_url: format!("http://localhost:{}", config.agent_port),
        capabilities: handler.capabilities(),
    };
    client.register(&record).await.map_err(|e| {
        anyhow!(
            "registration failed: {e}. Coordinator must be running at {}",
            config.coordinator_url
        )
    })?;

    info!(
        agent = %config.agent_name,
        port = config.agent_port,
        coordinator = %config.coordinator_url,
        "agent ready"
    );
    nwbforge_agent::server::serve(config.agent_name, kind, config.agent_port, handler).await
}
