//! The LLM client wrapper: timeout, bounded retries with exponential
//! backoff, circuit breaking, cancellation, and delta accumulation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChatBackend, ChatOutcome, ChatRequest, CircuitBreaker, LlmError, StreamEvent};

/// Hard cap on the accumulated response size.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Client tuning.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Per-call wall-clock timeout.
    pub timeout: Duration,
    /// Maximum number of retry attempts after the first call.
    pub max_retries: u32,
    /// Initial backoff delay between retries.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between retries.
    pub max_backoff: Duration,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Compute the backoff duration for a retry attempt.
pub fn retry_backoff(config: &LlmClientConfig, attempt: u32) -> Duration {
    let backoff = config
        .initial_backoff
        .saturating_mul(2u32.saturating_pow(attempt));
    backoff.min(config.max_backoff)
}

/// LLM client enforcing the failure policy around a [`ChatBackend`].
pub struct LlmClient {
    backend: Arc<dyn ChatBackend>,
    config: LlmClientConfig,
    breaker: CircuitBreaker,
}

impl LlmClient {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        config: LlmClientConfig,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            backend,
            config,
            breaker,
        }
    }

    /// The wrapped backend's provider name.
    pub fn provider_name(&self) -> &str {
        self.backend.provider_name()
    }

    /// Run a chat completion to the terminal event and return the
    /// aggregated text.
    ///
    /// Each arrived delta is forwarded on `delta_tx` (when given) for
    /// progress reporting. Transient failures retry with exponential
    /// backoff until `max_retries` is exhausted; an OPEN breaker fails
    /// immediately with [`LlmError::CircuitOpen`].
    pub async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        delta_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<ChatOutcome, LlmError> {
        let mut last_err = LlmError::Connection("no attempt made".to_string());

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            if !self.breaker.try_acquire() {
                return Err(LlmError::CircuitOpen);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                r = tokio::time::timeout(
                    self.config.timeout,
                    self.consume_stream(request, delta_tx.clone()),
                ) => match r {
                    Ok(inner) => inner,
                    Err(_) => Err(LlmError::Timeout(self.config.timeout.as_secs())),
                },
            };

            match outcome {
                Ok(text) => {
                    self.breaker.record(true);
                    return Ok(ChatOutcome {
                        text,
                        provider: self.backend.provider_name().to_string(),
                        model: request.model.clone(),
                    });
                }
                Err(LlmError::Cancelled) => {
                    // Cancellation is not a backend failure.
                    return Err(LlmError::Cancelled);
                }
                Err(e) => {
                    self.breaker.record(false);
                    if e.is_retryable() && attempt < self.config.max_retries {
                        let backoff = retry_backoff(&self.config, attempt);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max = self.config.max_retries + 1,
                            backoff_secs = backoff.as_secs(),
                            error = %e,
                            "transient LLM error; retrying"
                        );
                        last_err = e;
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Drain one token stream into a string.
    ///
    /// Completion is signalled either by the terminal event or by the
    /// upstream closing the channel.
    async fn consume_stream(
        &self,
        request: &ChatRequest,
        delta_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<String, LlmError> {
        let mut stream = self.backend.chat_stream(request).await?;
        let mut text = String::new();

        while let Some(event) = stream.recv().await {
            match event? {
                StreamEvent::Delta(delta) => {
                    if text.len() + delta.len() > MAX_RESPONSE_BYTES {
                        return Err(LlmError::Stream(format!(
                            "response exceeded {MAX_RESPONSE_BYTES} bytes"
                        )));
                    }
                    if let Some(tx) = &delta_tx {
                        let _ = tx.send(delta.clone());
                    }
                    text.push_str(&delta);
                }
                StreamEvent::Finish(_) => break,
            }
        }

        Ok(text)
    }
}
