//! LLM invocation with a bounded retry budget. The only automatic retry in
//! the system lives here; the workflow level never retries.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use ai_client::{AnthropicClient, ChatClient, ChatRequest, LlmError, OpenAiClient};
use nwbforge_common::{AgentConfig, LlmProvider};

const MAX_ATTEMPTS: u32 = 5;
/// Hard wall clock per attempt; metadata extraction over long free-text
/// files can be slow, but never three minutes slow.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptFailure {
    RateLimited,
    Api,
    TimedOut,
}

/// Backoff schedule, `attempt` counting from 0:
/// rate limits back off exponentially (1, 2, 4, 8, 16 s), other API errors
/// linearly (1..5 s), per-attempt timeouts linearly from 2 s.
pub(crate) fn backoff_delay(failure: AttemptFailure, attempt: u32) -> Duration {
    match failure {
        AttemptFailure::RateLimited => Duration::from_secs(1u64 << attempt),
        AttemptFailure::Api => Duration::from_secs(1 + u64::from(attempt)),
        AttemptFailure::TimedOut => Duration::from_secs(2 + u64::from(attempt)),
    }
}

pub struct LlmRunner {
    client: Box<dyn ChatClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl LlmRunner {
    pub fn from_config(config: &AgentConfig) -> Self {
        let client: Box<dyn ChatClient> = match config.llm_provider {
            LlmProvider::Anthropic => Box::new(AnthropicClient::new(&config.llm_api_key)),
            LlmProvider::OpenAi => Box::new(OpenAiClient::new(&config.llm_api_key)),
        };
        Self {
            client,
            model: config.llm_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_attempts: MAX_ATTEMPTS,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_client(client: Box<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: 0.3,
            max_tokens: 4096,
            max_attempts: MAX_ATTEMPTS,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }

    /// Call the configured model, retrying per the backoff schedule. On
    /// exhaustion the final provider error is surfaced unchanged.
    pub async fn call_llm(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: system.map(str::to_string),
            prompt: prompt.to_string(),
        };

        for attempt in 0..self.max_attempts {
            match tokio::time::timeout(self.attempt_timeout, self.client.chat(&request)).await {
                Ok(Ok(text)) => {
                    info!(
                        attempt = attempt + 1,
                        chars = text.len(),
                        model = %self.model,
                        "LLM call succeeded"
                    );
                    return Ok(text);
                }
                Ok(Err(err)) => {
                    let failure = match &err {
                        LlmError::RateLimited(_) => AttemptFailure::RateLimited,
                        _ => AttemptFailure::Api,
                    };
                    if attempt + 1 == self.max_attempts {
                        return Err(err.into());
                    }
                    let delay = backoff_delay(failure, attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(_elapsed) => {
                    if attempt + 1 == self.max_attempts {
                        anyhow::bail!(
                            "LLM call timed out after {} attempts ({}s each)",
                            self.max_attempts,
                            self.attempt_timeout.as_secs()
                        );
                    }
                    let delay = backoff_delay(AttemptFailure::TimedOut, attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs(),
                        "LLM call timed out, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        unreachable!("retry loop returns before exhausting attempts")
    }
}
