use std::env;

use crate::message::AgentKind;

/// LLM provider selector for the worker processes. Anthropic is preferred
/// when both API keys are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Anthropic => write!(f, "anthropic"),
            LlmProvider::OpenAi => write!(f, "openai"),
        }
    }
}

/// Coordinator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Session store
    pub redis_url: String,
    pub redis_session_ttl_secs: u64,
    pub session_base_path: String,
    pub output_base_path: String,

    // Coordinator bind address
    pub coordinator_host: String,
    pub coordinator_port: u16,

    // Worker ports (one per kind)
    pub metadata_agent_port: u16,
    pub conversion_agent_port: u16,
    pub evaluation_agent_port: u16,
}

impl Config {
    /// Load coordinator configuration. Panics with a clear message when a
    /// required value is malformed; startup must not proceed on bad config.
    pub fn coordinator_from_env() -> Self {
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());
        if !redis_url.starts_with("redis://") {
            panic!("REDIS_URL must start with 'redis://', got: {redis_url}");
        }
        Self {
            redis_url,
            redis_session_ttl_secs: parse_env("REDIS_SESSION_TTL", 86_400),
            session_base_path: env::var("SESSION_BASE_PATH").unwrap_or_else(|_| "./sessions".to_string()),
            output_base_path: env::var("OUTPUT_BASE_PATH").unwrap_or_else(|_| "./output".to_string()),
            coordinator_host: env::var("COORDINATOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            coordinator_port: parse_env("COORDINATOR_PORT", 3000),
            metadata_agent_port: parse_env("METADATA_AGENT_PORT", 3001),
            conversion_agent_port: parse_env("CONVERSION_AGENT_PORT", 3002),
            evaluation_agent_port: parse_env("EVALUATION_AGENT_PORT", 3003),
        }
    }

    pub fn agent_port(&self, kind: AgentKind) -> u16 {
        match kind {
            AgentKind::Metadata => self.metadata_agent_port,
            AgentKind::Conversion => self.conversion_agent_port,
            AgentKind::Evaluation => self.evaluation_agent_port,
        }
    }
}

/// Worker process configuration, one instance per agent kind.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_name: String,
    pub agent_kind: AgentKind,
    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub llm_api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub coordinator_url: String,
    pub agent_port: u16,
    pub output_base_path: String,
}

impl AgentConfig {
    /// Load configuration for one worker kind. Aborts startup when no usable
    /// LLM API key is configured. `LLM_PROVIDER` forces a provider; without
    /// it, Anthropic is preferred when both keys are present.
    pub fn from_env(kind: AgentKind) -> Self {
        let anthropic_key = env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        let openai_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        let (provider, api_key, default_model) = match env::var("LLM_PROVIDER").ok().as_deref() {
            Some("anthropic") => {
                let key = anthropic_key
                    .unwrap_or_else(|| panic!("LLM_PROVIDER=anthropic but ANTHROPIC_API_KEY is not set"));
                (LlmProvider::Anthropic, key, "claude-3-5-sonnet-20241022")
            }
            Some("openai") => {
                let key = openai_key
                    .unwrap_or_else(|| panic!("LLM_PROVIDER=openai but OPENAI_API_KEY is not set"));
                (LlmProvider::OpenAi, key, "gpt-4-turbo")
            }
            Some(other) => panic!("LLM_PROVIDER must be 'anthropic' or 'openai', got: {other}"),
            None => match (anthropic_key, openai_key) {
                (Some(key), _) => (LlmProvider::Anthropic, key, "claude-3-5-sonnet-20241022"),
                (None, Some(key)) => (LlmProvider::OpenAi, key, "gpt-4-turbo"),
                (None, None) => {
                    panic!("No LLM API key found. Set ANTHROPIC_API_KEY or OPENAI_API_KEY.")
                }
            },
        };

        let (prefix, default_temperature, default_max_tokens) = match kind {
            AgentKind::Metadata => ("METADATA", 0.7, 4096),
            AgentKind::Conversion => ("CONVERSION", 0.3, 8192),
            AgentKind::Evaluation => ("EVALUATION", 0.4, 4096),
        };

        let coordinator = Config::coordinator_from_env();

        Self {
            agent_name: kind.agent_name().to_string(),
            agent_kind: kind,
            llm_provider: provider,
            llm_model: env::var(format!("{prefix}_LLM_MODEL"))
                .unwrap_or_else(|_| default_model.to_string()),
            llm_api_key: api_key,
            temperature: parse_env(&format!("{prefix}_LLM_TEMPERATURE"), default_temperature),
            max_tokens: parse_env(&format!("{prefix}_LLM_MAX_TOKENS"), default_max_tokens),
            coordinator_url: env::var("COORDINATOR_URL").unwrap_or_else(|_| {
                format!("http://{}:{}", coordinator.coordinator_host, coordinator.coordinator_port)
            }),
            agent_port: coordinator.agent_port(kind),
            output_base_path: coordinator.output_base_path,
        }
    }

    /// Log sensitive values by length only.
    pub fn log_redacted(&self) {
        tracing::info!(
            agent = %self.agent_name,
            provider = %self.llm_provider,
            model = %self.llm_model,
            api_key_chars = self.llm_api_key.len(),
            "agent configuration loaded"
        );
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid number, got: {raw}")),
        Err(_) => default,
    }
}
