use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;

use super::{ChatProvider, ProviderError, ProviderEvent, ProviderRequest, ProviderStream};

#[derive(Debug, Clone)]
enum Script {
    /// Reply with fixed fragments, then stop.
    Reply(Vec<String>),
    /// Reply with fixed fragments, then fail.
    FailAfter(Vec<String>, String),
    /// Reply with fixed fragments, then never produce anything again.
    Stall(Vec<String>),
    /// Echo the newest user turn back word by word.
    Echo,
}

/// An in-process provider with deterministic output.
#[derive(Clone)]
pub struct ScriptedProvider {
    script: Script,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
    released: Arc<AtomicBool>,
}

impl ScriptedProvider {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: None,
            requests: Arc::default(),
            released: Arc::default(),
        }
    }

    pub fn replying<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Reply(fragments.into_iter().map(Into::into).collect()))
    }

    pub fn failing_after<I, S>(fragments: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::FailAfter(
            fragments.into_iter().map(Into::into).collect(),
            message.into(),
        ))
    }

    pub fn stalling_after<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Stall(fragments.into_iter().map(Into::into).collect()))
    }

    pub fn echo() -> Self {
        Self::with_script(Script::Echo)
    }

    /// Waits `delay` before each event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// True once a stream handed out by this provider has been dropped.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Flags the provider when the stream holding it is dropped.
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn echo_fragments(request: &ProviderRequest) -> Vec<String> {
    let text = request
        .last_user_message()
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    let reply = format!("You said: {text}");
    reply.split_inclusive(' ').map(String::from).collect()
}

impl ChatProvider for ScriptedProvider {
    fn stream_chat(&self, request: ProviderRequest) -> ProviderStream {
        let (fragments, ending) = match &self.script {
            Script::Reply(f) => (f.clone(), Some(Ok(ProviderEvent::Stop))),
            Script::FailAfter(f, msg) => (f.clone(), Some(Err(ProviderError::Api(msg.clone())))),
            Script::Stall(f) => (f.clone(), None),
            Script::Echo => (echo_fragments(&request), Some(Ok(ProviderEvent::Stop))),
        };
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let delay = self.delay;
        let guard = ReleaseGuard(self.released.clone());
        let stream = async_stream::stream! {
            let _guard = guard;
            for fragment in fragments {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(ProviderEvent::Delta(fragment));
            }
            match ending {
                Some(event) => {
                    yield event;
                }
                None => futures_util::future::pending::<()>().await,
            }
        };
        stream.boxed()
    }
}
