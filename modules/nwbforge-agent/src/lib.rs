pub mod client;
pub mod handler;
pub mod llm;
pub mod server;
pub mod workers;

pub use client::CoordinatorClient;
pub use handler::MessageHandler;
pub use llm::LlmRunner;
