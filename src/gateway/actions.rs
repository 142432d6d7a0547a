use super::AppState;
use crate::actions::{ApproveOutcome, ProposedAction, RejectOutcome};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

/// GET /actions/pending
pub async fn handle_pending(State(state): State<AppState>) -> Response {
    match state.pipeline.store().list_pending().await {
        Ok(actions) => Json(serde_json::json!({
            "count": actions.len(),
            "actions": actions,
        }))
        .into_response(),
        Err(error) => internal_error(&error),
    }
}

/// GET /actions/history?limit=N
pub async fn handle_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match state.pipeline.store().list_history(query.limit).await {
        Ok(actions) => Json(serde_json::json!({
            "count": actions.len(),
            "actions": actions,
        }))
        .into_response(),
        Err(error) => internal_error(&error),
    }
}

/// GET /actions/{id}
pub async fn handle_get(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.pipeline.store().get(&id).await {
        Ok(Some(action)) => Json(action).into_response(),
        Ok(None) => not_found(),
        Err(error) => internal_error(&error),
    }
}

/// POST /actions/{id}/approve. At-most-once execution: a repeat call
/// observes the already-decided state instead of re-executing.
pub async fn handle_approve(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.pipeline.store().approve(&id, &state.executor).await {
        Ok(ApproveOutcome::Executed { action, receipt }) => Json(serde_json::json!({
            "status": "executed",
            "action": action,
            "result": receipt,
        }))
        .into_response(),
        Ok(ApproveOutcome::Failed { action, summary }) => Json(serde_json::json!({
            "status": "failed",
            "action": action,
            "error": summary,
        }))
        .into_response(),
        Ok(ApproveOutcome::NotFound) => not_found(),
        Ok(ApproveOutcome::AlreadyDecided { action }) => conflict(&action),
        Err(error) => internal_error(&error),
    }
}

/// POST /actions/{id}/reject. Pure status transition.
pub async fn handle_reject(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.pipeline.store().reject(&id).await {
        Ok(RejectOutcome::Rejected(action)) => Json(serde_json::json!({
            "status": "rejected",
            "action": action,
        }))
        .into_response(),
        Ok(RejectOutcome::NotFound) => not_found(),
        Ok(RejectOutcome::AlreadyDecided { action }) => conflict(&action),
        Err(error) => internal_error(&error),
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "action not found" })),
    )
        .into_response()
}

fn conflict(action: &ProposedAction) -> Response {
    (
        StatusCode::CONFLICT,
        Json(serde_json::json!({
            "error": format!("action is not pending (status: {})", action.status),
            "action": action,
        })),
    )
        .into_response()
}

fn internal_error(error: &anyhow::Error) -> Response {
    tracing::error!(%error, "action endpoint failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}
