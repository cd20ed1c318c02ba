//! In-memory directory of live workers. Starts empty on every coordinator
//! boot; workers self-register over the internal API. There is no heartbeat:
//! a lost worker surfaces as a failed dispatch, and stale entries are
//! tolerated.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

use nwbforge_common::AgentRecord;

#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<String, AgentRecord>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert on name: re-registration after a worker restart replaces the
    /// previous record.
    pub fn register(&self, record: AgentRecord) {
        info!(name = %record.name, kind = %record.kind, base_url = %record.base_url, "agent registered");
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<AgentRecord> {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Defensive copy: callers cannot mutate registry state through the
    /// returned records.
    pub fn list(&self) -> Vec<AgentRecord> {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Idempotent removal.
    pub fn unregister(&self, name: &str) {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .remove(name);
    }
}
