use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Database errors ──────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Session '{session_id}' not found")]
    SessionNotFound { session_id: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Conversation must contain at least one message")]
    EmptyConversation,

    #[error("Conversation must contain at least one user message")]
    MissingUserTurn,

    #[error("Model '{model_name}' is not available")]
    UnknownModel { model_name: String },

    #[error("Rating must be between 1 and 5 (actual: {actual})")]
    InvalidRating { actual: u8 },

    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::SessionNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyConversation
                | AppError::MissingUserTurn
                | AppError::UnknownModel { .. }
                | AppError::InvalidRating { .. }
                | AppError::EmptyField { .. }
        )
    }

    pub fn status(&self) -> StatusCode {
        if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
