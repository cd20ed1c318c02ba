//! Public session lifecycle endpoints under `/api/v1/sessions`. Thin
//! handlers: validate, persist, dispatch, return. All heavy work happens in
//! the worker processes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use tracing::warn;

use nwbforge_common::api::{
    SessionClarifyRequest, SessionClarifyResponse, SessionInitializeRequest,
    SessionInitializeResponse, SessionResultResponse, SessionStatusResponse,
};
use nwbforge_common::{NwbforgeError, WorkflowStage};

use crate::api::error_response;
use crate::app::AppState;
use crate::workflow::{progress_percentage, status_message};

pub async fn initialize_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionInitializeRequest>,
) -> Response {
    match state.engine.initialize_session(&body.dataset_path).await {
        Ok(session) => {
            let response = SessionInitializeResponse {
                session_id: session.session_id.clone(),
                workflow_stage: session.workflow_stage,
                message: format!(
                    "Session {} initialized successfully. Starting metadata collection.",
                    session.session_id
                ),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            warn!(error = %e, dataset_path = %body.dataset_path, "session initialization failed");
            error_response(e)
        }
    }
}

pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    let session = match state.store.get(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return error_response(NwbforgeError::NotFound(format!(
                "Session {session_id} not found"
            )))
        }
        Err(e) => {
            warn!(error = %e, session_id, "failed to load session for status");
            return error_response(e);
        }
    };

    let response = SessionStatusResponse {
        session_id,
        workflow_stage: session.workflow_stage,
        progress_percentage: progress_percentage(session.workflow_stage),
        status_message: status_message(session.workflow_stage).to_string(),
        current_agent: session.current_agent,
        requires_clarification: session.requires_user_clarification,
        clarification_prompt: session.clarification_prompt,
    };
    Json(response).into_response()
}

pub async fn clarify_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<SessionClarifyRequest>,
) -> Response {
    match state.engine.submit_clarification(&session_id, &body).await {
        Ok(session) => Json(SessionClarifyResponse {
            message: "Clarification received. Processing your input.".to_string(),
            workflow_stage: session.workflow_stage,
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, session_id, "clarification dispatch failed");
            error_response(e)
        }
    }
}

pub async fn session_result(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    let session = match state.store.get(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return error_response(NwbforgeError::NotFound(format!(
                "Session {session_id} not found"
            )))
        }
        Err(e) => {
            warn!(error = %e, session_id, "failed to load session for result");
            return error_response(e);
        }
    };

    if session.workflow_stage != WorkflowStage::Completed {
        return error_response(NwbforgeError::Validation(format!(
            "Session {session_id} is not completed. Current stage: {}",
            session.workflow_stage
        )));
    }

    let (Some(conversion), Some(validation)) =
        (session.conversion_results, session.validation_results)
    else {
        warn!(session_id, "completed session is missing results data");
        return error_response(NwbforgeError::Storage(
            "Session marked as completed but missing results data".to_string(),
        ));
    };

    let response = SessionResultResponse {
        session_id,
        nwb_file_path: conversion
            .nwb_file_path
            .or(session.output_nwb_path)
            .unwrap_or_default(),
        validation_report_path: validation
            .validation_report_path
            .or(session.output_report_path)
            .unwrap_or_default(),
        overall_status: validation.overall_status,
        llm_validation_summary: validation.llm_validation_summary.unwrap_or_default(),
        validation_issues: validation.issues,
    };
    Json(response).into_response()
}
