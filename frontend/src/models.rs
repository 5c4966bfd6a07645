use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Matches the backend `Role` enum.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Matches the backend `Message` model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: Option<String>) -> Self {
        Self { role: Role::User, content: content.into(), timestamp }
    }

    pub fn assistant(content: impl Into<String>, timestamp: Option<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), timestamp }
    }
}

/// Request body for `POST /api/chat`.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// One frame of the chat response body.
/// Matches the backend `StreamEvent` enum (internally tagged).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Content {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        message: Message,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        message_count: usize,
    },
    Error {
        error: String,
    },
}

/// Limits served by `GET /api/config`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub max_messages: i64,
    pub max_words: usize,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub default_model: String,
}

impl Default for ClientConfig {
    /// Used until the server config has loaded.
    fn default() -> Self {
        Self { max_messages: -1, max_words: 1000, models: Vec::new(), default_model: String::new() }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Thumbs {
    Up,
    Down,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct FeedbackEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbs: Option<Thumbs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

pub type FeedbackMap = BTreeMap<usize, FeedbackEntry>;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct OverallFeedback {
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbs: Option<Thumbs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveConversationRequest {
    pub session_id: String,
    pub username: String,
    pub messages: Vec<Message>,
    pub feedback: FeedbackMap,
}

#[derive(Clone, Debug, Serialize)]
pub struct FeedbackUpdateRequest {
    pub feedback: FeedbackMap,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSessionRequest {
    pub overall_feedback: OverallFeedback,
}
