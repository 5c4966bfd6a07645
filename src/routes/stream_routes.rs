use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::AppError;
use crate::models::ConversationRequest;
use crate::routes::AppState;

/// POST `/api/chat` — streams the assistant reply.
///
/// Protocol (`text/plain`, one frame per event):
/// - `data: {"type":"content","content":"..."}\n\n` (repeated)
/// - `data: {"type":"complete","message":{...},"timestamp":"...","messageCount":N}\n\n`
///   or `data: {"type":"error","error":"..."}\n\n`, then the body ends.
///
/// Validation failures are returned as a plain JSON error before any stream
/// is opened.
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ConversationRequest>,
) -> Result<Response, AppError> {
    let prepared = state.chat.prepare(request)?;
    let events = state.chat.start(prepared);

    let frames = ReceiverStream::new(events)
        .map(|event| Ok::<Bytes, Infallible>(Bytes::from(event.to_frame())));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .map_err(|e| AppError::Unexpected(format!("Failed to build stream response: {e}")))
}
