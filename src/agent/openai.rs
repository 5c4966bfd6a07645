use futures_util::StreamExt;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sse::SseDecoder;
use super::{ChatProvider, ProviderError, ProviderEvent, ProviderRequest, ProviderStream};
use crate::models::Role;

const DONE_SENTINEL: &str = "[DONE]";
const MAX_ERROR_BODY: usize = 512;

/// Streams completions from an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: Role,
    content: String,
}

impl From<ProviderRequest> for CompletionRequest {
    fn from(req: ProviderRequest) -> Self {
        Self {
            model: req.model,
            messages: req
                .messages
                .into_iter()
                .map(|m| WireMessage { role: m.role, content: m.content })
                .collect(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: true,
        }
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Interprets one `data:` payload from the upstream stream.
fn parse_chunk(data: &str) -> Result<Vec<ProviderEvent>, ProviderError> {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Ok(vec![ProviderEvent::Stop]);
    }

    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::MalformedChunk(e.to_string()))?;
    if let Some(err) = chunk.error {
        return Err(ProviderError::Api(err.message));
    }

    let mut events = Vec::with_capacity(2);
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.content {
            events.push(ProviderEvent::Delta(content));
        }
        if choice.finish_reason.is_some() {
            events.push(ProviderEvent::Stop);
        }
    }
    Ok(events)
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

impl ChatProvider for OpenAiProvider {
    fn stream_chat(&self, request: ProviderRequest) -> ProviderStream {
        let body = CompletionRequest::from(request);
        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send();

        Box::pin(async_stream::stream! {
            let response = match send.await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(ProviderError::Transport(e));
                    return;
                }
            };
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                yield Err(ProviderError::Status { status: status.as_u16(), body: truncate(text) });
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::Transport(e));
                        return;
                    }
                };
                for data in decoder.push(&chunk) {
                    let events = match parse_chunk(&data) {
                        Ok(events) => events,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    for event in events {
                        let stop = event == ProviderEvent::Stop;
                        yield Ok::<ProviderEvent, ProviderError>(event);
                        if stop {
                            return;
                        }
                    }
                }
            }

            if decoder.pending() > 0 {
                warn!("Upstream stream ended with {} undecoded bytes", decoder.pending());
            }
            debug!("Upstream stream ended without a stop signal");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_deltas() {
        let events = parse_chunk(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#)
            .unwrap();
        assert_eq!(events, vec![ProviderEvent::Delta("Hel".into())]);
    }

    #[test]
    fn finish_reason_and_done_both_stop() {
        let events =
            parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(events, vec![ProviderEvent::Stop]);
        assert_eq!(parse_chunk("[DONE]").unwrap(), vec![ProviderEvent::Stop]);
    }

    #[test]
    fn role_only_and_usage_chunks_produce_nothing() {
        let events = parse_chunk(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert!(events.is_empty());
        let events = parse_chunk(r#"{"choices":[],"usage":{"total_tokens":12}}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn error_payloads_and_garbage_fail() {
        let err = parse_chunk(r#"{"error":{"message":"rate limited","type":"requests"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api(ref m) if m == "rate limited"));

        let err = parse_chunk("{not json").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedChunk(_)));
    }

    #[test]
    fn request_body_enables_streaming() {
        let body = CompletionRequest::from(ProviderRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![crate::models::Message::user("Hello!")],
            temperature: 0.7,
            max_tokens: 1024,
        });
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["max_tokens"], 1024);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "Hello!");
        assert!(value["messages"][0].get("timestamp").is_none());
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = truncate("é".repeat(400));
        assert!(body.len() <= MAX_ERROR_BODY);
        assert!(body.chars().all(|c| c == 'é'));
    }
}
