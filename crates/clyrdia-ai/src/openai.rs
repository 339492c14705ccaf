//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::model::{FragmentStream, ModelClient, ModelError, ModelRequest};

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1` (no trailing slash needed).
    pub fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn body(&self, request: &ModelRequest, stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// One decoded server-sent event.
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Data(String),
    Done,
}

/// Incremental `data:` line decoder for chunked SSE bodies.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }
        events
    }
}

/// Content fragment carried by one streamed chunk, if any.
pub(crate) fn chunk_content(data: &str) -> Result<Option<String>, ModelError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| ModelError::Decode(e.to_string()))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: ModelRequest) -> Result<FragmentStream, ModelError> {
        let resp = self.post(&self.body(&request, true)).await?;
        info!(model = %self.model, "model stream opened");
        let mut bytes = resp.bytes_stream();

        let fragments = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err::<String, ModelError>(ModelError::Transport(e.to_string()));
                        return;
                    }
                };
                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Done => break 'read,
                        SseEvent::Data(data) => match chunk_content(&data) {
                            Ok(Some(content)) => yield Ok(content),
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        },
                    }
                }
            }
            debug!("model stream finished");
        };
        Ok(fragments.boxed())
    }

    async fn complete(&self, request: ModelRequest) -> Result<String, ModelError> {
        let resp = self.post(&self.body(&request, false)).await?;
        let completion: Completion = resp
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| ModelError::Decode("completion has no content".into()))
    }

    async fn ping(&self) -> Result<(), ModelError> {
        if self.api_key.trim().is_empty() {
            return Err(ModelError::NotConfigured("missing API key".into()));
        }
        Ok(())
    }
}
