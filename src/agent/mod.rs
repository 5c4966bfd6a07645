//! Upstream chat-completion providers.
//!
//! A provider turns a conversation into a stream of text fragments that ends
//! with [`ProviderEvent::Stop`] or an error. The relay in
//! [`crate::service::chat_service`] only depends on [`ChatProvider`].

mod openai;
mod scripted;
pub mod sse;

use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::config::{LlmConfig, ProviderKind};
use crate::models::{Message, Role};

pub use openai::OpenAiProvider;
pub use scripted::ScriptedProvider;

/// Everything the provider needs for one streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ProviderRequest {
    /// The newest user turn, if any.
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// An incremental piece of assistant text. May be empty.
    Delta(String),
    /// The provider finished generating.
    Stop,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider error: {0}")]
    Api(String),

    #[error("malformed chunk: {0}")]
    MalformedChunk(String),
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

pub trait ChatProvider: Send + Sync {
    /// Starts a streaming completion. Dropping the stream releases the
    /// underlying connection.
    fn stream_chat(&self, request: ProviderRequest) -> ProviderStream;
}

/// Builds the provider selected by configuration.
pub fn provider_from_config(config: &LlmConfig) -> Box<dyn ChatProvider> {
    match config.provider {
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(&config.base_url, &config.api_key)),
        ProviderKind::Scripted => Box::new(ScriptedProvider::echo()),
    }
}
