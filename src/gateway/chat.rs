use super::AppState;
use crate::pipeline::{ChatRequest, MAX_HISTORY_MESSAGES, MAX_MESSAGE_CHARS};
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

/// POST /chat/stream: run the pipeline and stream `ChatEvent`s as SSE
/// `data:` frames. The event ordering (one `meta`, then `content`, then one
/// terminal) is the wire contract; clients rely on it to know when to stop
/// reading.
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return bad_request("message cannot be empty");
    }
    if request.message.chars().count() > MAX_MESSAGE_CHARS {
        return bad_request("message too long");
    }
    if request.history.len() > MAX_HISTORY_MESSAGES {
        return bad_request("chat history too long");
    }

    // Dropping the response body drops the pipeline stream, which stops
    // further LLM and lookup invocations; in-flight lookups complete
    // detached and are discarded.
    let cancel = CancellationToken::new();
    let events = state
        .pipeline
        .respond(state.session.clone(), request, cancel);

    let frames = events.map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| {
            r#"{"type":"error","message":"event serialization failed"}"#.to_string()
        });
        Ok::<_, std::convert::Infallible>(format!("data: {json}\n\n"))
    });

    let mut response = Response::new(Body::from_stream(frames));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    response
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
