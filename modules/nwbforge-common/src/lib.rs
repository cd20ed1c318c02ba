pub mod api;
pub mod config;
pub mod error;
pub mod message;
pub mod session;

pub use config::{AgentConfig, Config, LlmProvider};
pub use error::NwbforgeError;
pub use message::*;
pub use session::*;
