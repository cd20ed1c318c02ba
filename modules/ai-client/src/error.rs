use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    /// HTTP 429 from the provider. Retry with exponential backoff.
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    /// Any other non-success status from the provider.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Connection-level failure (refused, DNS, TLS, body read).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The provider replied 200 but the body had no usable text.
    #[error("empty response from provider")]
    EmptyResponse,
}
