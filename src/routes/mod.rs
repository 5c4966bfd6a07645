pub mod api_routes;
pub mod stream_routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::models::ClientConfig;
use crate::service::chat_service::ChatService;
use crate::service::conversation_service::ConversationService;
use api_routes::{
    complete_session_handler, config_handler, feedback_handler, get_conversation_handler,
    save_conversation_handler,
};
use stream_routes::chat_handler;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub conversations: ConversationService,
    pub client_config: Arc<ClientConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/config", get(config_handler))
        .route("/api/conversations", post(save_conversation_handler))
        .route("/api/conversations/{session_id}", get(get_conversation_handler))
        .route("/api/conversations/{session_id}/feedback", post(feedback_handler))
        .route("/api/conversations/{session_id}/complete", post(complete_session_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
