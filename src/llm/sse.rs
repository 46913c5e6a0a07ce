//! OpenAI-compatible SSE streaming backend.
//!
//! Speaks the `chat/completions` streaming wire format:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}
//!
//! data: {"choices":[{"delta":{"content":" world"},"finish_reason":null}]}
//!
//! data: [DONE]
//! ```
//!
//! Any server exposing this format works (OpenAI, Ollama, vLLM, local
//! gateways); the daemon treats them all as one provider shape.

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{ChatBackend, ChatRequest, FinishReason, LlmError, StreamEvent, TokenStream};

/// Channel capacity for in-flight stream events.
const EVENT_BUFFER: usize = 64;

/// delta structure of the streaming response
#[derive(Debug, Deserialize)]
struct SseDelta {
    choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    delta: SseContent,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseContent {
    content: Option<String>,
}

/// Parse one SSE line and extract the data payload.
fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
}

fn finish_reason(raw: &str) -> FinishReason {
    match raw {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Incremental SSE line parser.
///
/// Network chunks split lines arbitrarily, so bytes are buffered and
/// handed out event by event. [`SseParser::finish`] decides whether a
/// stream that ended without `[DONE]` was a clean close (recover) or a
/// truncation (error).
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    parse_errors: usize,
    finished: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk; returns the events it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer.drain(..=pos);

            if line.is_empty() {
                continue;
            }
            let Some(data) = parse_sse_line(&line) else {
                continue;
            };

            if data == "[DONE]" {
                self.finished = true;
                events.push(StreamEvent::Finish(FinishReason::Stop));
                return events;
            }

            match serde_json::from_str::<SseDelta>(data) {
                Ok(delta) => {
                    if let Some(choice) = delta.choices.first() {
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                events.push(StreamEvent::Delta(content.clone()));
                            }
                        }
                        if let Some(reason) = &choice.finish_reason {
                            self.finished = true;
                            events.push(StreamEvent::Finish(finish_reason(reason)));
                            return events;
                        }
                    }
                }
                Err(e) => {
                    self.parse_errors += 1;
                    tracing::warn!(error = %e, line = %data, "failed to parse SSE data line");
                }
            }
        }

        events
    }

    /// Close the parser after the upstream stream ends.
    ///
    /// A close without a terminal event is a clean completion when at
    /// least some lines parsed; all-errors means the stream was garbage.
    pub fn finish(self) -> Result<Option<StreamEvent>, LlmError> {
        if self.finished {
            return Ok(None);
        }
        if self.parse_errors > 0 {
            return Err(LlmError::Stream(format!(
                "stream ended without terminal event; {} unparseable lines",
                self.parse_errors
            )));
        }
        Ok(Some(StreamEvent::Finish(FinishReason::Stop)))
    }

    /// Whether a terminal event has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// OpenAI-compatible streaming backend over `reqwest`.
#[derive(Debug)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    api_key: String,
}

impl OpenAiBackend {
    /// Create a backend.
    ///
    /// `provider` is the label surfaced in results (`openai`,
    /// `openai-compatible`); `base_url` is the API root without the
    /// `/chat/completions` suffix.
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "no API key set for the LLM backend".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            provider: provider.into(),
            base_url: base_url.into(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl ChatBackend for OpenAiBackend {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<TokenStream, LlmError> {
        let body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "stream": true,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Connection(format!("request timed out: {e}"))
                } else {
                    LlmError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Connection(e.to_string()))).await;
                        return;
                    }
                };
                for event in parser.push(&String::from_utf8_lossy(&chunk)) {
                    let terminal = matches!(event, StreamEvent::Finish(_));
                    if tx.send(Ok(event)).await.is_err() || terminal {
                        return;
                    }
                }
            }

            match parser.finish() {
                Ok(Some(event)) => {
                    let _ = tx.send(Ok(event)).await;
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(rx)
    }
}
