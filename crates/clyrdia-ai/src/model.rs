//! The language-model collaborator.
//!
//! A [`ModelClient`] turns one [`ModelRequest`] into a lazy stream of text
//! fragments. Streams are restartable per call but not resumable: a failed
//! stream is retried, if at all, by issuing a new request.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("could not decode model output: {0}")]
    Decode(String),

    #[error("model client is not configured: {0}")]
    NotConfigured(String),
}

/// Lazy sequence of completion fragments, terminated by stream end.
pub type FragmentStream = BoxStream<'static, Result<String, ModelError>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier recorded in analysis metadata.
    fn model_name(&self) -> &str;

    /// Start a streamed completion.
    async fn stream(&self, request: ModelRequest) -> Result<FragmentStream, ModelError>;

    /// One-shot completion. Defaults to draining [`stream`](Self::stream).
    async fn complete(&self, request: ModelRequest) -> Result<String, ModelError> {
        let mut fragments = self.stream(request).await?;
        let mut out = String::new();
        while let Some(fragment) = fragments.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }

    /// Cheap readiness probe used by health checks.
    async fn ping(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

// ── Scripted model ──

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these fragments, then end.
    Reply(Vec<String>),
    /// Fail before streaming anything.
    Fail(String),
    /// Stream these fragments, then fail.
    FailAfter(Vec<String>, String),
}

impl Script {
    /// A reply delivered as fragments of at most `chunk` characters.
    pub fn chunked(text: &str, chunk: usize) -> Self {
        let chars: Vec<char> = text.chars().collect();
        Self::Reply(
            chars
                .chunks(chunk.max(1))
                .map(|c| c.iter().collect())
                .collect(),
        )
    }
}

/// Deterministic [`ModelClient`] that replays scripts in call order and
/// counts invocations. Calls past the end of the script reuse the fallback.
pub struct ScriptedModel {
    scripts: Mutex<Vec<Script>>,
    fallback: Script,
    calls: AtomicUsize,
    fragment_delay: Option<Duration>,
}

impl ScriptedModel {
    /// Every call streams `text` in small fragments.
    pub fn replying(text: &str) -> Self {
        Self::with_scripts(Vec::new(), Script::chunked(text, 16))
    }

    pub fn with_scripts(scripts: Vec<Script>, fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            fallback,
            calls: AtomicUsize::new(0),
            fragment_delay: None,
        }
    }

    /// Sleep before each fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Number of `stream`/`complete` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        scripts.get(index).cloned().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, _request: ModelRequest) -> Result<FragmentStream, ModelError> {
        let (fragments, failure) = match self.next_script() {
            Script::Reply(fragments) => (fragments, None),
            Script::Fail(message) => return Err(ModelError::Transport(message)),
            Script::FailAfter(fragments, message) => (fragments, Some(message)),
        };
        let delay = self.fragment_delay;
        let items = fragments
            .into_iter()
            .map(Ok)
            .chain(failure.map(|m| Err(ModelError::Transport(m))));
        Ok(stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }
}
