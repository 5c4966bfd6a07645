//! The per-tab conversation session and its IDLE/STREAMING state machine.
//!
//! ```text
//! Idle --(send)--> Streaming --(content)--> Streaming
//! Streaming --(complete | error | cancel)--> Idle
//! ```

use thiserror::Error;

use crate::models::{ChatRequest, ClientConfig, FeedbackEntry, FeedbackMap, Message, StreamEvent};

/// Shown in place of the assistant reply when a stream fails.
pub const STREAM_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Streaming,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("A response is still streaming")]
    AlreadyStreaming,

    #[error("No response is streaming")]
    NotStreaming,

    #[error("Stream {stream} is no longer current")]
    StaleStream { stream: StreamId },

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Message has {count} words; the limit is {max}")]
    TooManyWords { count: usize, max: usize },

    #[error("This conversation has reached its limit of {max} messages")]
    ContextLimitReached { max: i64 },
}

/// Identifies one send. A stream's callbacks only act on the session while
/// its id is still the current one.
pub type StreamId = u64;

/// What an applied stream event did to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Fragment,
    /// The reply was committed to history.
    Completed,
    /// A synthetic error reply was committed to history.
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatSession {
    session_id: String,
    history: Vec<Message>,
    in_progress: String,
    status: SessionStatus,
    stream: StreamId,
    feedback: FeedbackMap,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: Vec::new(),
            in_progress: String::new(),
            status: SessionStatus::Idle,
            stream: 0,
            feedback: FeedbackMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Id of the most recent send.
    pub fn stream_id(&self) -> StreamId {
        self.stream
    }

    pub fn is_streaming(&self) -> bool {
        self.status == SessionStatus::Streaming
    }

    /// The partial reply, while streaming.
    pub fn in_progress(&self) -> Option<&str> {
        self.is_streaming().then_some(self.in_progress.as_str())
    }

    pub fn feedback(&self) -> &FeedbackMap {
        &self.feedback
    }

    /// Checks the configured limits without changing anything.
    pub fn check_limits(&self, text: &str, limits: &ClientConfig) -> Result<(), SessionError> {
        let words = text.split_whitespace().count();
        if words == 0 {
            return Err(SessionError::EmptyMessage);
        }
        if words > limits.max_words {
            return Err(SessionError::TooManyWords { count: words, max: limits.max_words });
        }
        if limits.max_messages >= 0 && self.history.len() as i64 >= limits.max_messages {
            return Err(SessionError::ContextLimitReached { max: limits.max_messages });
        }
        Ok(())
    }

    /// Appends the user turn and enters STREAMING. Returns the request to send.
    pub fn begin_send(
        &mut self,
        text: &str,
        limits: &ClientConfig,
        model: Option<String>,
        timestamp: Option<String>,
    ) -> Result<ChatRequest, SessionError> {
        if self.is_streaming() {
            return Err(SessionError::AlreadyStreaming);
        }
        self.check_limits(text, limits)?;

        self.history.push(Message::user(text.trim(), timestamp));
        self.in_progress.clear();
        self.status = SessionStatus::Streaming;
        self.stream += 1;

        Ok(ChatRequest { messages: self.history.clone(), model })
    }

    /// Applies one decoded event of `stream`. Events are only accepted while
    /// that stream is the one STREAMING, so anything arriving after a
    /// terminal event, a cancel, or a newer send is rejected.
    pub fn apply_event(&mut self, stream: StreamId, event: StreamEvent) -> Result<Applied, SessionError> {
        self.ensure_current(stream)?;
        match event {
            StreamEvent::Content { content } => {
                self.in_progress.push_str(&content);
                Ok(Applied::Fragment)
            }
            StreamEvent::Complete { message, .. } => {
                self.history.push(message);
                self.finish();
                Ok(Applied::Completed)
            }
            StreamEvent::Error { error } => {
                log::error!("Chat stream failed: {error}");
                self.push_failure(None);
                Ok(Applied::Failed)
            }
        }
    }

    /// The transfer failed outside the event protocol: HTTP error, dropped
    /// connection, or a body that ended without a terminal event.
    /// Ignored unless `stream` is the one still STREAMING.
    pub fn fail(&mut self, stream: StreamId, timestamp: Option<String>) -> bool {
        if self.ensure_current(stream).is_err() {
            return false;
        }
        self.push_failure(timestamp);
        true
    }

    /// User-initiated abort. Drops the partial reply without adding an error
    /// message; finalized history is kept. A no-op when idle.
    pub fn cancel(&mut self) -> bool {
        if !self.is_streaming() {
            return false;
        }
        self.finish();
        true
    }

    /// Merges a partial rating for the message at `index` and returns the
    /// update to send to the feedback store.
    pub fn rate(&mut self, index: usize, update: FeedbackEntry) -> FeedbackMap {
        let entry = self.feedback.entry(index).or_default();
        if update.thumbs.is_some() {
            entry.thumbs = update.thumbs;
        }
        if update.rating.is_some() {
            entry.rating = update.rating;
        }
        if update.comment.is_some() {
            entry.comment = update.comment.clone();
        }
        FeedbackMap::from([(index, update)])
    }

    fn ensure_current(&self, stream: StreamId) -> Result<(), SessionError> {
        if !self.is_streaming() {
            return Err(SessionError::NotStreaming);
        }
        if stream != self.stream {
            return Err(SessionError::StaleStream { stream });
        }
        Ok(())
    }

    fn push_failure(&mut self, timestamp: Option<String>) {
        self.history.push(Message::assistant(STREAM_ERROR_MESSAGE, timestamp));
        self.finish();
    }

    fn finish(&mut self) {
        self.in_progress.clear();
        self.status = SessionStatus::Idle;
    }
}
