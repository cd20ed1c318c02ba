pub mod api;
pub mod app;
pub mod context;
pub mod registry;
pub mod router;
pub mod workflow;

pub use app::{build_router, AppState};
pub use context::{ContextStore, MemoryCache, RedisCache, SessionCache};
pub use registry::AgentRegistry;
pub use router::MessageRouter;
pub use workflow::WorkflowEngine;
