use js_sys::{Reflect, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortController, AbortSignal, ReadableStreamDefaultReader};

use gloo_net::http::Request;
use leptos::task::spawn_local;

use crate::api::API_BASE;
use crate::models::{ChatRequest, StreamEvent};
use crate::stream::FrameDecoder;

/// How a chat stream ended, from the transport's point of view.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    /// The body was read to the end.
    Finished,
    /// The user cancelled; nothing more will be delivered.
    Aborted,
    Failed(String),
}

/// Aborts the in-flight request when asked. Dropping the handle does not.
#[derive(Clone)]
pub struct StreamHandle {
    controller: AbortController,
}

impl StreamHandle {
    pub fn abort(&self) {
        self.controller.abort();
    }
}

/// Posts `request` to the chat endpoint and reads the response body as it
/// arrives, invoking `on_event` for every decoded frame and `on_end` once.
pub fn start_streaming(
    request: ChatRequest,
    on_event: impl Fn(StreamEvent) + 'static,
    on_end: impl FnOnce(StreamOutcome) + 'static,
) -> Option<StreamHandle> {
    let controller = match AbortController::new() {
        Ok(controller) => controller,
        Err(e) => {
            on_end(StreamOutcome::Failed(format!("Failed to create abort controller: {e:?}")));
            return None;
        }
    };
    let signal = controller.signal();

    spawn_local(async move {
        let outcome = match read_stream(&request, &signal, &on_event).await {
            Ok(()) => StreamOutcome::Finished,
            Err(_) if signal.aborted() => StreamOutcome::Aborted,
            Err(e) => StreamOutcome::Failed(e),
        };
        on_end(outcome);
    });

    Some(StreamHandle { controller })
}

async fn read_stream(
    request: &ChatRequest,
    signal: &AbortSignal,
    on_event: &impl Fn(StreamEvent),
) -> Result<(), String> {
    let resp = Request::post(&format!("{API_BASE}/api/chat"))
        .abort_signal(Some(signal))
        .json(request)
        .map_err(|e| format!("Serialize error: {e}"))?
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;

    if !resp.ok() {
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("Server error: {} {body}", resp.status()));
    }

    let body = resp.body().ok_or_else(|| "Response has no body".to_string())?;
    let reader: ReadableStreamDefaultReader = body.get_reader().unchecked_into();
    let mut decoder = FrameDecoder::new();

    loop {
        let chunk = JsFuture::from(reader.read()).await.map_err(js_error)?;
        let done = Reflect::get(&chunk, &JsValue::from_str("done"))
            .map_err(js_error)?
            .as_bool()
            .unwrap_or(true);
        if done {
            break;
        }
        let value = Reflect::get(&chunk, &JsValue::from_str("value")).map_err(js_error)?;
        for event in decoder.push(&Uint8Array::new(&value).to_vec()) {
            // Stop delivering the moment the user cancels.
            if signal.aborted() {
                return Err("aborted".to_string());
            }
            on_event(event);
        }
    }

    decoder.finish();
    Ok(())
}

fn js_error(e: JsValue) -> String {
    format!("Stream read error: {e:?}")
}
