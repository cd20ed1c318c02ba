pub mod downloads;
pub mod health;
pub mod internal;
pub mod sessions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use nwbforge_common::NwbforgeError;

/// Translate the error taxonomy to HTTP. Internal detail stays in the logs;
/// the body carries only the short, user-facing message.
pub(crate) fn error_response(err: NwbforgeError) -> Response {
    let status = match &err {
        NwbforgeError::Validation(_) => StatusCode::BAD_REQUEST,
        NwbforgeError::NotFound(_) => StatusCode::NOT_FOUND,
        NwbforgeError::Transport(_)
        | NwbforgeError::Worker(_)
        | NwbforgeError::Storage(_)
        | NwbforgeError::Config(_)
        | NwbforgeError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "detail": err.to_string() }))).into_response()
}
