//! HTTP gateway exposing the streaming chat contract and the action
//! approval endpoints.

mod actions;
mod chat;

use crate::actions::ActionExecutor;
use crate::config::ConfigHandle;
use crate::pipeline::Pipeline;
use crate::sources::SessionContext;
use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub executor: Arc<ActionExecutor>,
    /// Capability bundle for the authenticated principal. Session and OAuth
    /// management live outside this crate; a deployment wires the providers
    /// it has linked.
    pub session: SessionContext,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/chat/stream", post(chat::handle_chat_stream))
        .route("/actions/pending", get(actions::handle_pending))
        .route("/actions/history", get(actions::handle_history))
        .route("/actions/{id}", get(actions::handle_get))
        .route("/actions/{id}/approve", post(actions::handle_approve))
        .route("/actions/{id}/reject", post(actions::handle_reject))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(
    config: &ConfigHandle,
    pipeline: Arc<Pipeline>,
    executor: Arc<ActionExecutor>,
    session: SessionContext,
) -> anyhow::Result<()> {
    let cfg = config.load_full();
    let addr = format!("{}:{}", cfg.gateway.host, cfg.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind gateway on {addr}"))?;

    tracing::info!(%addr, "gateway listening");

    let app = router(AppState {
        pipeline,
        executor,
        session,
    })
    .layer(RequestBodyLimitLayer::new(cfg.gateway.max_body_bytes))
    .layer(TimeoutLayer::new(Duration::from_secs(
        cfg.gateway.request_timeout_secs,
    )));

    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
