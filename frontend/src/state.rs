use leptos::prelude::*;
use leptos::task::spawn_local;

use crate::api;
use crate::models::{ClientConfig, FeedbackEntry, OverallFeedback, SaveConversationRequest, StreamEvent, Thumbs};
use crate::session::{Applied, ChatSession, StreamId};
use crate::sse::{self, StreamHandle, StreamOutcome};

/// Shared application state, provided via Leptos context.
#[derive(Clone, Copy)]
pub struct AppState {
    // --- Read signals (for components to subscribe to) ---
    pub session: ReadSignal<ChatSession>,
    pub config: ReadSignal<ClientConfig>,
    pub model: ReadSignal<String>,
    pub username: ReadSignal<String>,
    pub notice: ReadSignal<Option<String>>,
    pub completed: ReadSignal<bool>,

    // --- Write signals (for mutating state) ---
    pub set_session: WriteSignal<ChatSession>,
    pub set_config: WriteSignal<ClientConfig>,
    pub set_model: WriteSignal<String>,
    pub set_username: WriteSignal<String>,
    pub set_notice: WriteSignal<Option<String>>,
    pub set_completed: WriteSignal<bool>,

    stream: StoredValue<Option<(StreamId, StreamHandle)>, LocalStorage>,
}

impl AppState {
    /// Create a new `AppState` and provide it in the current Leptos context.
    pub fn provide() -> Self {
        let (session, set_session) = signal(ChatSession::new(new_session_id()));
        let (config, set_config) = signal(ClientConfig::default());
        let (model, set_model) = signal(String::new());
        let (username, set_username) = signal(String::new());
        let (notice, set_notice) = signal(None::<String>);
        let (completed, set_completed) = signal(false);

        let state = Self {
            session,
            config,
            model,
            username,
            notice,
            completed,
            set_session,
            set_config,
            set_model,
            set_username,
            set_notice,
            set_completed,
            stream: StoredValue::new_local(None),
        };

        provide_context(state);
        state
    }

    /// Load limits and models from the backend. Defaults apply until then.
    pub fn load_config(&self) {
        let state = *self;
        spawn_local(async move {
            match api::fetch_config().await {
                Ok(config) => {
                    if state.model.get_untracked().is_empty() {
                        state.set_model.set(config.default_model.clone());
                    }
                    state.set_config.set(config);
                }
                Err(e) => {
                    log::error!("Failed to fetch config: {e}");
                    state.set_notice.set(Some(e));
                }
            }
        });
    }

    /// Send a message and stream the reply into the session.
    pub fn send_message(&self, text: String) {
        let config = self.config.get_untracked();
        let model = Some(self.model.get_untracked()).filter(|m| !m.is_empty());

        let sent = self.set_session.try_update(|s| {
            s.begin_send(&text, &config, model, Some(now_iso()))
                .map(|request| (s.stream_id(), request))
        });
        let (stream_id, request) = match sent {
            Some(Ok(sent)) => sent,
            Some(Err(e)) => {
                self.set_notice.set(Some(e.to_string()));
                return;
            }
            None => return,
        };
        self.set_notice.set(None);

        let state = *self;
        let on_event = move |event: StreamEvent| {
            match state.set_session.try_update(|s| s.apply_event(stream_id, event)) {
                Some(Ok(Applied::Completed)) => state.persist(),
                Some(Ok(Applied::Failed)) => {
                    state.set_notice.set(Some("The assistant could not finish its reply.".into()));
                }
                Some(Ok(Applied::Fragment)) | None => {}
                Some(Err(e)) => log::debug!("Dropping stream event: {e}"),
            }
        };

        let on_end = move |outcome: StreamOutcome| {
            // A newer send may already own the handle slot.
            state.stream.update_value(|slot| {
                if slot.as_ref().is_some_and(|(id, _)| *id == stream_id) {
                    *slot = None;
                }
            });
            match outcome {
                StreamOutcome::Aborted => {}
                StreamOutcome::Finished => {
                    // A body that ends without a terminal event is a failure.
                    let failed = state.set_session.try_update(|s| s.fail(stream_id, Some(now_iso())));
                    if failed == Some(true) {
                        log::warn!("Chat stream ended without a terminal event");
                    }
                }
                StreamOutcome::Failed(err) => {
                    log::error!("Chat stream error: {err}");
                    let failed = state.set_session.try_update(|s| s.fail(stream_id, Some(now_iso())));
                    if failed == Some(true) {
                        state.set_notice.set(Some(err));
                    }
                }
            }
        };

        let handle = sse::start_streaming(request, on_event, on_end);
        self.stream.set_value(handle.map(|h| (stream_id, h)));
    }

    /// Abort the in-flight reply. Safe to call when nothing is streaming.
    pub fn cancel(&self) {
        if let Some((_, handle)) = self.stream.try_update_value(|h| h.take()).flatten() {
            handle.abort();
        }
        self.set_session.update(|s| {
            s.cancel();
        });
    }

    /// Rate one message; only the changed fields are sent.
    pub fn rate_message(&self, index: usize, update: FeedbackEntry) {
        let Some(changed) = self.set_session.try_update(|s| s.rate(index, update)) else {
            return;
        };
        let session_id = self.session.with_untracked(|s| s.session_id().to_string());
        let set_notice = self.set_notice;
        spawn_local(async move {
            if let Err(e) = api::send_feedback(&session_id, changed).await {
                log::error!("Failed to save feedback: {e}");
                set_notice.set(Some(e));
            }
        });
    }

    /// Submit the overall rating and mark the session complete.
    pub fn complete_session(&self, rating: u8, thumbs: Option<Thumbs>, comment: String) {
        let state = *self;
        let session_id = self.session.with_untracked(|s| s.session_id().to_string());
        let comment = Some(comment.trim().to_string()).filter(|c| !c.is_empty());
        let overall = OverallFeedback { rating, thumbs, comment };
        spawn_local(async move {
            match api::complete_session(&session_id, overall).await {
                Ok(()) => state.set_completed.set(true),
                Err(e) => {
                    log::error!("Failed to complete session: {e}");
                    state.set_notice.set(Some(e));
                }
            }
        });
    }

    /// Start over with an empty conversation and a fresh session id.
    pub fn new_session(&self) {
        self.cancel();
        self.set_session.set(ChatSession::new(new_session_id()));
        self.set_completed.set(false);
        self.set_notice.set(None);
    }

    /// Saves the transcript. Only called once a `complete` event is applied.
    fn persist(&self) {
        let body = self.session.with_untracked(|s| SaveConversationRequest {
            session_id: s.session_id().to_string(),
            username: self.username.get_untracked(),
            messages: s.history().to_vec(),
            feedback: s.feedback().clone(),
        });
        spawn_local(async move {
            if let Err(e) = api::save_conversation(&body).await {
                log::error!("Failed to save conversation: {e}");
            }
        });
    }
}

fn now_iso() -> String {
    js_sys::Date::new_0().to_iso_string().into()
}

fn new_session_id() -> String {
    let random = (js_sys::Math::random() * f64::from(u32::MAX)) as u32;
    format!("{:x}-{random:08x}", js_sys::Date::now() as u64)
}
