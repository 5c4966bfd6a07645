use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn. Clients may omit `timestamp` on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), timestamp: Some(Utc::now()) }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Body of `POST /api/chat`: the full history up to the newest user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Events written to the chat response body, one `data:` frame each.
///
/// `Complete` and `Error` are terminal: nothing follows either of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Content {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        message: Message,
        timestamp: DateTime<Utc>,
        message_count: usize,
    },
    Error {
        error: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    /// Renders the event as a `data: <json>\n\n` frame.
    pub fn to_frame(&self) -> String {
        // Serializing this enum cannot fail: every field is a plain string,
        // integer or timestamp.
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":"failed to encode event"}"#.to_string()
        });
        format!("data: {json}\n\n")
    }
}

// ── Feedback ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Thumbs {
    Up,
    Down,
}

/// Per-message rating. Every field is optional so partial updates can be merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbs: Option<Thumbs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl FeedbackEntry {
    /// Overwrites the fields present in `update`, keeping the rest.
    pub fn merge(&mut self, update: FeedbackEntry) {
        if update.thumbs.is_some() {
            self.thumbs = update.thumbs;
        }
        if update.rating.is_some() {
            self.rating = update.rating;
        }
        if update.comment.is_some() {
            self.comment = update.comment;
        }
    }
}

/// Message index → feedback for that message.
pub type FeedbackMap = BTreeMap<usize, FeedbackEntry>;

pub fn merge_feedback(stored: &mut FeedbackMap, update: FeedbackMap) {
    for (index, entry) in update {
        stored.entry(index).or_default().merge(entry);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallFeedback {
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbs: Option<Thumbs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ── Conversation store records ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub session_id: String,
    pub username: String,
    pub messages: Json<Vec<Message>>,
    pub feedback: Json<FeedbackMap>,
    pub overall_feedback: Option<Json<OverallFeedback>>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveConversationRequest {
    pub session_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub feedback: FeedbackMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackUpdateRequest {
    pub feedback: FeedbackMap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSessionRequest {
    pub overall_feedback: OverallFeedback,
}

/// Read-only limits and model list served to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// `-1` means unlimited.
    pub max_messages: i64,
    pub max_words: usize,
    pub models: Vec<String>,
    pub default_model: String,
}
