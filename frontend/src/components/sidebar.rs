use leptos::prelude::*;

use crate::models::Thumbs;
use crate::state::AppState;

/// Sidebar with session details, model choice, and the closing survey.
#[component]
pub fn Sidebar() -> impl IntoView {
    let state = expect_context::<AppState>();

    let message_limit = move || {
        let max = state.config.with(|c| c.max_messages);
        let used = state.session.with(|s| s.history().len());
        if max < 0 { format!("{used} messages") } else { format!("{used} / {max} messages") }
    };

    view! {
        <aside class="sidebar">
            <div class="sidebar-header">
                <h2>"Feedback Chat"</h2>
                <button class="new-chat-btn" on:click=move |_| state.new_session()>
                    "+ New Session"
                </button>
            </div>

            <label class="field">
                "Name"
                <input
                    type="text"
                    prop:value=state.username
                    on:input=move |ev| state.set_username.set(event_target_value(&ev))
                />
            </label>

            <label class="field">
                "Model"
                <select
                    prop:value=state.model
                    on:change=move |ev| state.set_model.set(event_target_value(&ev))
                    disabled=move || state.session.with(|s| s.is_streaming())
                >
                    {move || {
                        state.config.get().models
                            .into_iter()
                            .map(|m| view! { <option value=m.clone()>{m}</option> })
                            .collect_view()
                    }}
                </select>
            </label>

            <div class="session-info">{message_limit}</div>

            <SessionSurvey />
        </aside>
    }
}

/// Overall rating form; submitting it completes the session.
#[component]
fn SessionSurvey() -> impl IntoView {
    let state = expect_context::<AppState>();
    let (rating, set_rating) = signal(None::<u8>);
    let (thumbs, set_thumbs) = signal(None::<Thumbs>);
    let (comment, set_comment) = signal(String::new());

    let can_submit = move || {
        rating.get().is_some()
            && !state.completed.get()
            && state.session.with(|s| !s.history().is_empty() && !s.is_streaming())
    };

    let on_submit = move |_| {
        if let Some(rating) = rating.get_untracked() {
            state.complete_session(rating, thumbs.get_untracked(), comment.get_untracked());
        }
    };

    view! {
        <div class="survey">
            <h3>"Rate this session"</h3>
            <div class="rating-row">
                {(1..=5u8).map(|r| view! {
                    <button
                        class="rating-btn"
                        class:selected=move || rating.get() == Some(r)
                        on:click=move |_| set_rating.set(Some(r))
                    >
                        {r}
                    </button>
                }).collect_view()}
            </div>
            <div class="rating-row">
                <button
                    class="thumb-btn"
                    class:selected=move || thumbs.get() == Some(Thumbs::Up)
                    on:click=move |_| set_thumbs.set(Some(Thumbs::Up))
                >
                    "👍"
                </button>
                <button
                    class="thumb-btn"
                    class:selected=move || thumbs.get() == Some(Thumbs::Down)
                    on:click=move |_| set_thumbs.set(Some(Thumbs::Down))
                >
                    "👎"
                </button>
            </div>
            <textarea
                rows="3"
                placeholder="Anything else? (optional)"
                prop:value=comment
                on:input=move |ev| set_comment.set(event_target_value(&ev))
            />
            <button class="send-btn" on:click=on_submit disabled=move || !can_submit()>
                {move || if state.completed.get() { "Thanks!" } else { "Finish session" }}
            </button>
        </div>
    }
}
