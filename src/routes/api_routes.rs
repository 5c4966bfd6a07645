use axum::extract::{Path, State};
use axum::Json;

use crate::errors::AppError;
use crate::models::{
    ClientConfig, CompleteSessionRequest, ConversationRecord, FeedbackUpdateRequest,
    SaveConversationRequest,
};
use crate::routes::AppState;

/// GET `/api/config` — limits and models the browser enforces before sending.
pub async fn config_handler(State(state): State<AppState>) -> Json<ClientConfig> {
    Json(state.client_config.as_ref().clone())
}

/// POST `/api/conversations` — upsert a transcript by session id.
pub async fn save_conversation_handler(
    State(state): State<AppState>,
    Json(request): Json<SaveConversationRequest>,
) -> Result<Json<ConversationRecord>, AppError> {
    state.conversations.save(request).await.map(Json)
}

/// GET `/api/conversations/{session_id}`
pub async fn get_conversation_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ConversationRecord>, AppError> {
    state.conversations.get(&session_id).await.map(Json)
}

/// POST `/api/conversations/{session_id}/feedback` — merge per-message feedback.
pub async fn feedback_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<FeedbackUpdateRequest>,
) -> Result<Json<ConversationRecord>, AppError> {
    state
        .conversations
        .merge_feedback(&session_id, request.feedback)
        .await
        .map(Json)
}

/// POST `/api/conversations/{session_id}/complete` — overall rating, closes the session.
pub async fn complete_session_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<CompleteSessionRequest>,
) -> Result<Json<ConversationRecord>, AppError> {
    state
        .conversations
        .complete(&session_id, request.overall_feedback)
        .await
        .map(Json)
}
