use futures_util::StreamExt;
use httpmock::Method::POST;
use httpmock::MockServer;

use feedback_chat::agent::{ChatProvider, OpenAiProvider, ProviderError, ProviderEvent, ProviderRequest};
use feedback_chat::models::Message;

fn request() -> ProviderRequest {
    ProviderRequest {
        model: "gpt-4o-mini".into(),
        messages: vec![Message::system("Be brief."), Message::user("Hello!")],
        temperature: 0.7,
        max_tokens: 256,
    }
}

fn sse(chunks: &[&str]) -> String {
    chunks.iter().map(|c| format!("data: {c}\n\n")).collect()
}

#[tokio::test]
async fn streams_deltas_until_done() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(sse(&[
                    r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#,
                    r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#,
                    r#"{"choices":[{"delta":{"content":" there"},"finish_reason":null}]}"#,
                    r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                    "[DONE]",
                ]));
        })
        .await;

    let provider = OpenAiProvider::new(&format!("{}/v1", server.base_url()), "test-key");
    let events: Vec<_> = provider.stream_chat(request()).collect().await;
    let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();

    assert_eq!(
        events,
        vec![
            ProviderEvent::Delta("Hi".into()),
            ProviderEvent::Delta(" there".into()),
            ProviderEvent::Stop,
        ]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401).body(r#"{"error":{"message":"invalid api key"}}"#);
        })
        .await;

    let provider = OpenAiProvider::new(&server.base_url(), "wrong");
    let events: Vec<_> = provider.stream_chat(request()).collect().await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        Err(ProviderError::Status { status, body }) => {
            assert_eq!(*status, 401);
            assert!(body.contains("invalid api key"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn error_payload_mid_stream_ends_the_stream() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(sse(&[
                    r#"{"choices":[{"delta":{"content":"One"},"finish_reason":null}]}"#,
                    r#"{"choices":[{"delta":{"content":" two"},"finish_reason":null}]}"#,
                    r#"{"error":{"message":"The server had an error"}}"#,
                    r#"{"choices":[{"delta":{"content":"never"},"finish_reason":null}]}"#,
                ]));
        })
        .await;

    let provider = OpenAiProvider::new(&server.base_url(), "key");
    let events: Vec<_> = provider.stream_chat(request()).collect().await;

    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], Ok(ProviderEvent::Delta(d)) if d == "One"));
    assert!(matches!(&events[1], Ok(ProviderEvent::Delta(d)) if d == " two"));
    assert!(matches!(&events[2], Err(ProviderError::Api(m)) if m == "The server had an error"));
}

#[tokio::test]
async fn unreachable_upstream_is_a_transport_error() {
    // Nothing listens on port 9 on a test machine.
    let provider = OpenAiProvider::new("http://127.0.0.1:9", "key");
    let events: Vec<_> = provider.stream_chat(request()).collect().await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Err(ProviderError::Transport(_))));
}
