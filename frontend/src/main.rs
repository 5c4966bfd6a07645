mod api;
mod components;
mod models;
mod session;
mod sse;
mod state;
mod stream;

use leptos::mount::mount_to_body;
use leptos::prelude::*;

use components::chat::ChatArea;
use components::sidebar::Sidebar;
use state::AppState;

/// Root application component.
#[component]
fn App() -> impl IntoView {
    let state = AppState::provide();

    // Limits and models; built-in defaults apply until this lands
    state.load_config();

    view! {
        <div class="app-container">
            <Sidebar />
            <ChatArea />
        </div>
    }
}

fn main() {
    console_log::init_with_level(log::Level::Debug).expect("Failed to init logger");
    mount_to_body(App);
}
