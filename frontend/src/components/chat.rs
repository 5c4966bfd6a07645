use leptos::ev;
use leptos::prelude::*;

use crate::models::{FeedbackEntry, Message, Role, Thumbs};
use crate::state::AppState;

/// Main chat area with message history, streaming display, and input.
#[component]
pub fn ChatArea() -> impl IntoView {
    let state = expect_context::<AppState>();

    // Fragments only touch the in-progress buffer; keep the history list stable.
    let history = Memo::new(move |_| state.session.with(|s| s.history().to_vec()));
    let in_progress = Memo::new(move |_| state.session.with(|s| s.in_progress().map(str::to_string)));

    view! {
        <main class="chat-area">
            // Notice banner
            {move || {
                state.notice.get().map(|notice| {
                    view! {
                        <div class="error-banner">{notice}</div>
                    }
                })
            }}

            <div class="chat-header">
                {move || state.session.with(|s| format!("Session {}", s.session_id()))}
            </div>

            <div class="messages-container">
                {move || {
                    if history.with(Vec::is_empty) && in_progress.get().is_none() {
                        view! {
                            <div class="empty-state">
                                "Send a message to start chatting"
                            </div>
                        }.into_any()
                    } else {
                        view! {
                            {move || {
                                history.get()
                                    .into_iter()
                                    .enumerate()
                                    .map(|(index, msg)| view! { <MessageBubble index msg /> })
                                    .collect_view()
                            }}
                            // Reply being streamed
                            {move || {
                                in_progress.get().map(|text| {
                                    view! {
                                        <div class="message assistant">
                                            <div class="role-label">"assistant"</div>
                                            <div class="streaming-cursor">{text}</div>
                                        </div>
                                    }
                                })
                            }}
                        }.into_any()
                    }
                }}
            </div>

            <ChatInput />
        </main>
    }
}

/// A single chat message bubble. Assistant replies carry rating controls.
#[component]
fn MessageBubble(index: usize, msg: Message) -> impl IntoView {
    let is_user = msg.role == Role::User;
    let css_class = if is_user { "message user" } else { "message assistant" };

    view! {
        <div class=css_class>
            <div class="role-label">{msg.role.as_str()}</div>
            <div>{msg.content}</div>
            {(!is_user).then(|| view! { <MessageFeedback index /> })}
        </div>
    }
}

#[component]
fn MessageFeedback(index: usize) -> impl IntoView {
    let state = expect_context::<AppState>();
    let current = Memo::new(move |_| {
        state.session.with(|s| s.feedback().get(&index).cloned().unwrap_or_default())
    });

    let thumbs = move |thumbs: Thumbs| {
        state.rate_message(index, FeedbackEntry { thumbs: Some(thumbs), ..Default::default() });
    };
    let on_rating = move |ev: ev::Event| {
        if let Ok(rating) = event_target_value(&ev).parse::<u8>() {
            state.rate_message(index, FeedbackEntry { rating: Some(rating), ..Default::default() });
        }
    };
    // Sent on change (blur or Enter), not per keystroke.
    let on_comment = move |ev: ev::Event| {
        let comment = event_target_value(&ev).trim().to_string();
        if current.with_untracked(|c| c.comment.as_deref().unwrap_or_default() != comment) {
            state.rate_message(index, FeedbackEntry { comment: Some(comment), ..Default::default() });
        }
    };

    view! {
        <div class="message-feedback">
            <button
                class="thumb-btn"
                class:selected=move || current.get().thumbs == Some(Thumbs::Up)
                on:click=move |_| thumbs(Thumbs::Up)
            >
                "👍"
            </button>
            <button
                class="thumb-btn"
                class:selected=move || current.get().thumbs == Some(Thumbs::Down)
                on:click=move |_| thumbs(Thumbs::Down)
            >
                "👎"
            </button>
            <select on:change=on_rating prop:value=move || {
                current.get().rating.map(|r| r.to_string()).unwrap_or_default()
            }>
                <option value="">"Rate"</option>
                {(1..=5u8).map(|r| view! { <option value=r.to_string()>{r}</option> }).collect_view()}
            </select>
            <input
                type="text"
                class="feedback-comment"
                placeholder="Comment (optional)"
                prop:value=move || current.get().comment.unwrap_or_default()
                on:change=on_comment
            />
        </div>
    }
}

/// Chat input form with textarea, word counter, and send/cancel buttons.
#[component]
fn ChatInput() -> impl IntoView {
    let state = expect_context::<AppState>();
    let (input, set_input) = signal(String::new());

    let is_streaming = move || state.session.with(|s| s.is_streaming());
    let word_count = move || input.with(|text| text.split_whitespace().count());
    let over_limit = move || word_count() > state.config.with(|c| c.max_words);

    let send = move || {
        let text = input.get_untracked();
        if text.trim().is_empty() || is_streaming() || over_limit() {
            return;
        }
        set_input.set(String::new());
        state.send_message(text);
    };

    let on_keydown = move |ev: ev::KeyboardEvent| {
        if ev.key() == "Enter" && !ev.shift_key() {
            ev.prevent_default();
            send();
        }
    };

    view! {
        <div class="input-area">
            <div class="input-row">
                <textarea
                    rows="1"
                    placeholder="Type a message… (Enter to send, Shift+Enter for newline)"
                    prop:value=input
                    on:input=move |ev| {
                        set_input.set(event_target_value(&ev));
                    }
                    on:keydown=on_keydown
                    disabled=move || is_streaming() || state.completed.get()
                />
                {move || {
                    if is_streaming() {
                        view! {
                            <button class="cancel-btn" on:click=move |_| state.cancel()>
                                "Stop"
                            </button>
                        }.into_any()
                    } else {
                        view! {
                            <button
                                class="send-btn"
                                on:click=move |_| send()
                                disabled=move || input.get().trim().is_empty() || over_limit()
                            >
                                "Send"
                            </button>
                        }.into_any()
                    }
                }}
            </div>
            <div class="word-count" class:over-limit=over_limit>
                {move || format!("{} / {} words", word_count(), state.config.with(|c| c.max_words))}
            </div>
        </div>
    }
}
