use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::agent::{ChatProvider, ProviderError, ProviderEvent, ProviderRequest, ProviderStream};
use crate::config::LlmConfig;
use crate::errors::AppError;
use crate::models::{ConversationRequest, Message, Role, StreamEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A validated request, ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct PreparedChat {
    pub request: ProviderRequest,
    /// Conversation length once the assistant reply is appended.
    pub message_count: usize,
}

#[derive(Clone)]
pub struct ChatService {
    provider: Arc<dyn ChatProvider>,
    llm: Arc<LlmConfig>,
}

impl ChatService {
    pub fn new(provider: Arc<dyn ChatProvider>, llm: LlmConfig) -> Self {
        Self { provider, llm: Arc::new(llm) }
    }

    /// Validates the conversation and builds the upstream request.
    ///
    /// Fails when there are no messages, no user turn, or the model is not
    /// on the allow-list. Nothing is sent upstream in that case.
    pub fn prepare(&self, request: ConversationRequest) -> Result<PreparedChat, AppError> {
        if request.messages.is_empty() {
            return Err(AppError::EmptyConversation);
        }
        if !request.messages.iter().any(|m| m.role == Role::User) {
            return Err(AppError::MissingUserTurn);
        }

        let model = match request.model.filter(|m| !m.trim().is_empty()) {
            None => self.llm.default_model.clone(),
            Some(model) if self.llm.models.contains(&model) => model,
            Some(model) => return Err(AppError::UnknownModel { model_name: model }),
        };

        let message_count =
            request.messages.iter().filter(|m| m.role != Role::System).count() + 1;

        let mut messages = request.messages;
        if let Some(prompt) = &self.llm.system_prompt {
            if messages.first().map(|m| m.role) != Some(Role::System) {
                messages.insert(0, Message::system(prompt.clone()));
            }
        }

        Ok(PreparedChat {
            request: ProviderRequest {
                model,
                messages,
                temperature: self.llm.temperature,
                max_tokens: self.llm.max_tokens,
            },
            message_count,
        })
    }

    /// Starts the upstream call and returns the receiving end of the event
    /// channel. The relay stops as soon as the receiver is dropped.
    pub fn start(&self, prepared: PreparedChat) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        info!(
            model = %prepared.request.model,
            messages = prepared.request.messages.len(),
            "Starting chat stream"
        );
        let upstream = self.provider.stream_chat(prepared.request);
        let span = info_span!("relay", request_id = %Uuid::new_v4());
        tokio::spawn(relay(upstream, prepared.message_count, tx).instrument(span));
        rx
    }
}

/// Producer-side bookkeeping for one request.
#[derive(Debug, Default)]
struct RelayState {
    accumulator: String,
    finished: bool,
}

impl RelayState {
    fn on_fragment(&mut self, fragment: String) -> Option<StreamEvent> {
        if self.finished || fragment.is_empty() {
            return None;
        }
        self.accumulator.push_str(&fragment);
        Some(StreamEvent::Content { content: fragment })
    }

    fn on_stop(&mut self, message_count: usize) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(StreamEvent::Complete {
            message: Message::assistant(std::mem::take(&mut self.accumulator)),
            timestamp: Utc::now(),
            message_count,
        })
    }

    fn on_error(&mut self, err: &ProviderError) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.accumulator.clear();
        Some(StreamEvent::Error { error: err.to_string() })
    }
}

/// Forwards upstream fragments to `tx` until exactly one terminal event has
/// been sent or the receiver goes away. Dropping `upstream` on return
/// releases the provider connection.
pub async fn relay(
    mut upstream: ProviderStream,
    message_count: usize,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut state = RelayState::default();
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!("Client disconnected, dropping upstream stream");
                return;
            }
            next = upstream.next() => next,
        };

        let event = match next {
            Some(Ok(ProviderEvent::Delta(fragment))) => state.on_fragment(fragment),
            Some(Ok(ProviderEvent::Stop)) | None => state.on_stop(message_count),
            Some(Err(e)) => {
                error!("Upstream stream failed: {e}");
                state.on_error(&e)
            }
        };

        let Some(event) = event else {
            continue;
        };
        let terminal = event.is_terminal();
        if tx.send(event).await.is_err() {
            debug!("Client disconnected before the event could be delivered");
            return;
        }
        if terminal {
            debug!("Chat stream finished");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agent::ScriptedProvider;

    fn llm() -> LlmConfig {
        LlmConfig {
            models: vec!["gpt-4o-mini".into(), "gpt-4o".into()],
            system_prompt: Some("You are a helpful assistant.".into()),
            ..LlmConfig::default()
        }
    }

    fn service(provider: ScriptedProvider) -> ChatService {
        ChatService::new(Arc::new(provider), llm())
    }

    fn hello() -> ConversationRequest {
        ConversationRequest { messages: vec![Message::user("Hello!")], model: None }
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn rejects_empty_conversations() {
        let svc = service(ScriptedProvider::replying(["x"]));
        let err = svc
            .prepare(ConversationRequest { messages: vec![], model: None })
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyConversation));
    }

    #[test]
    fn rejects_conversations_without_a_user_turn() {
        let svc = service(ScriptedProvider::replying(["x"]));
        let err = svc
            .prepare(ConversationRequest {
                messages: vec![Message::assistant("Hi, how can I help?")],
                model: None,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::MissingUserTurn));
    }

    #[test]
    fn rejects_models_outside_the_allow_list() {
        let svc = service(ScriptedProvider::replying(["x"]));
        let err = svc
            .prepare(ConversationRequest { model: Some("davinci".into()), ..hello() })
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownModel { ref model_name } if model_name == "davinci"));
    }

    #[test]
    fn prepends_system_prompt_and_counts_visible_messages() {
        let svc = service(ScriptedProvider::replying(["x"]));
        let prepared = svc
            .prepare(ConversationRequest { model: Some("gpt-4o".into()), ..hello() })
            .unwrap();
        assert_eq!(prepared.request.model, "gpt-4o");
        assert_eq!(prepared.request.messages[0].role, Role::System);
        assert_eq!(prepared.request.messages.len(), 2);
        assert_eq!(prepared.message_count, 2);

        let prepared = svc.prepare(hello()).unwrap();
        assert_eq!(prepared.request.model, "gpt-4o-mini");
    }

    #[test]
    fn keeps_a_caller_supplied_system_turn() {
        let svc = service(ScriptedProvider::replying(["x"]));
        let prepared = svc
            .prepare(ConversationRequest {
                messages: vec![Message::system("Answer in French."), Message::user("Hi")],
                model: None,
            })
            .unwrap();
        assert_eq!(prepared.request.messages.len(), 2);
        assert_eq!(prepared.request.messages[0].content, "Answer in French.");
        assert_eq!(prepared.message_count, 2);
    }

    #[tokio::test]
    async fn fragments_concatenate_to_the_complete_message() {
        let svc = service(ScriptedProvider::replying(["Hel", "", "lo", " there", "!"]));
        let events = drain(svc.start(svc.prepare(hello()).unwrap())).await;

        let mut text = String::new();
        for event in &events[..events.len() - 1] {
            match event {
                StreamEvent::Content { content } => text.push_str(content),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(events.len(), 5, "empty fragments are not forwarded");
        match events.last().unwrap() {
            StreamEvent::Complete { message, message_count, .. } => {
                assert_eq!(message.role, Role::Assistant);
                assert_eq!(message.content, text);
                assert_eq!(message.content, "Hello there!");
                assert_eq!(*message_count, 2);
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upstream_failure_yields_one_error_event() {
        let svc = service(ScriptedProvider::failing_after(["Hel", "lo"], "connection reset"));
        let events = drain(svc.start(svc.prepare(hello()).unwrap())).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Content { content: "Hel".into() });
        assert_eq!(events[1], StreamEvent::Content { content: "lo".into() });
        assert!(matches!(&events[2], StreamEvent::Error { error } if error.contains("connection reset")));
    }

    #[tokio::test]
    async fn at_most_one_terminal_event() {
        let upstream: ProviderStream = futures_util::stream::iter(vec![
            Ok(ProviderEvent::Delta("a".into())),
            Ok(ProviderEvent::Stop),
            Ok(ProviderEvent::Delta("b".into())),
            Ok(ProviderEvent::Stop),
            Err(ProviderError::Api("late".into())),
        ])
        .boxed();
        let (tx, rx) = mpsc::channel(8);
        relay(upstream, 2, tx).await;

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn stream_end_without_stop_completes() {
        let upstream: ProviderStream =
            futures_util::stream::iter(vec![Ok(ProviderEvent::Delta("done".into()))]).boxed();
        let (tx, rx) = mpsc::channel(8);
        relay(upstream, 4, tx).await;

        let events = drain(rx).await;
        assert!(matches!(
            &events[1],
            StreamEvent::Complete { message, message_count: 4, .. } if message.content == "done"
        ));
    }

    #[tokio::test]
    async fn dropping_the_receiver_releases_the_upstream_stream() {
        let provider = ScriptedProvider::stalling_after(["partial"]);
        let svc = service(provider.clone());
        let mut rx = svc.start(svc.prepare(hello()).unwrap());

        assert_eq!(rx.recv().await, Some(StreamEvent::Content { content: "partial".into() }));
        drop(rx);

        for _ in 0..100 {
            if provider.released() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upstream stream was not released after the client went away");
    }
}
