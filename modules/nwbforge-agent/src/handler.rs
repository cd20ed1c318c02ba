use async_trait::async_trait;
use serde_json::{json, Value};

use nwbforge_common::McpMessage;

/// The one capability a worker implements. Replies are JSON objects with at
/// minimum a `status` field of `"success"` or `"error"`; task-specific
/// fields ride alongside.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn capabilities(&self) -> Vec<String>;
    async fn handle(&self, message: McpMessage) -> Value;
}

pub fn success_reply(session_id: Option<&str>, extra: Value) -> Value {
    let mut reply = json!({ "status": "success", "session_id": session_id });
    merge_fields(&mut reply, extra);
    reply
}

pub fn error_reply(session_id: Option<&str>, message: impl std::fmt::Display) -> Value {
    json!({
        "status": "error",
        "session_id": session_id,
        "message": message.to_string(),
    })
}

fn merge_fields(reply: &mut Value, extra: Value) {
    if let (Some(reply), Value::Object(extra)) = (reply.as_object_mut(), extra) {
        for (key, value) in extra {
            reply.insert(key, value);
        }
    }
}
