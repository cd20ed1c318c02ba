pub mod anthropic;
pub mod error;
pub mod openai;

use async_trait::async_trait;

pub use anthropic::AnthropicClient;
pub use error::LlmError;
pub use openai::OpenAiClient;

/// One chat turn: a user prompt with an optional system message and the
/// sampling parameters the caller configured per agent kind.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Option<String>,
    pub prompt: String,
}

/// Provider-agnostic chat surface. Errors are split by kind so callers can
/// choose a backoff policy (rate limits back off exponentially, other API
/// errors linearly).
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError>;
}
