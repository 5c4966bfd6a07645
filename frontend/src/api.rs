use gloo_net::http::{Request, Response};
use serde::Serialize;

use crate::models::{
    ClientConfig, CompleteSessionRequest, FeedbackMap, FeedbackUpdateRequest, OverallFeedback,
    SaveConversationRequest,
};

/// Base URL of the backend API server.
pub const API_BASE: &str = "http://localhost:8080";

/// Fetches the conversation limits and model list.
pub async fn fetch_config() -> Result<ClientConfig, String> {
    let resp = Request::get(&format!("{API_BASE}/api/config"))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;

    if !resp.ok() {
        return Err(format!("Server error: {}", resp.status()));
    }

    resp.json::<ClientConfig>()
        .await
        .map_err(|e| format!("Parse error: {e}"))
}

/// Stores the conversation after an exchange completes.
pub async fn save_conversation(body: &SaveConversationRequest) -> Result<(), String> {
    post_json(&format!("{API_BASE}/api/conversations"), body).await
}

/// Sends a partial per-message rating, merged server-side.
pub async fn send_feedback(session_id: &str, feedback: FeedbackMap) -> Result<(), String> {
    post_json(
        &format!("{API_BASE}/api/conversations/{session_id}/feedback"),
        &FeedbackUpdateRequest { feedback },
    )
    .await
}

/// Marks the session complete with its overall rating.
pub async fn complete_session(session_id: &str, overall_feedback: OverallFeedback) -> Result<(), String> {
    post_json(
        &format!("{API_BASE}/api/conversations/{session_id}/complete"),
        &CompleteSessionRequest { overall_feedback },
    )
    .await
}

async fn post_json<T: Serialize>(url: &str, body: &T) -> Result<(), String> {
    let resp = Request::post(url)
        .json(body)
        .map_err(|e| format!("Serialize error: {e}"))?
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    check(resp).await
}

async fn check(resp: Response) -> Result<(), String> {
    if resp.ok() {
        return Ok(());
    }
    let detail = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_default();
    Err(format!("Server error: {} {detail}", resp.status()))
}
