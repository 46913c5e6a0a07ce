//! LLM streaming client: token-stream consumption with timeout, retry,
//! and a circuit breaker.
//!
//! The vendor protocol is deliberately thin: a [`ChatBackend`] turns a
//! chat request into a lazy stream of [`StreamEvent`]s, and everything
//! else — retries, backoff, the breaker, cancellation, accumulation —
//! lives in [`client::LlmClient`] on this side of the trait.

pub mod breaker;
pub mod client;
pub mod sse;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use breaker::{BreakerConfig, BreakerStatus, CircuitBreaker};
pub use client::{LlmClient, LlmClientConfig};

/// Errors from the LLM client stack.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("LLM API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM connection error: {0}")]
    Connection(String),

    #[error("LLM stream error: {0}")]
    Stream(String),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("request cancelled")]
    Cancelled,

    #[error("LLM backend not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// Whether a retry is worthwhile: transient transport and server
    /// conditions only. Schema/auth problems repeat on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout(_) | LlmError::Connection(_) | LlmError::Stream(_) => true,
            LlmError::Api { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504 | 529)
            }
            LlmError::CircuitOpen | LlmError::Cancelled | LlmError::NotConfigured(_) => false,
        }
    }
}

/// Why the stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Normal completion.
    Stop,
    /// The model hit its output budget.
    Length,
    /// Any provider-specific reason.
    Other(String),
}

/// One event on the token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta.
    Delta(String),
    /// Terminal event; no deltas follow.
    Finish(FinishReason),
}

/// Lazy token stream produced by a backend.
pub type TokenStream = mpsc::Receiver<Result<StreamEvent, LlmError>>;

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f64,
}

/// Aggregated completion plus the identifiers that produced it.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: String,
    pub provider: String,
    pub model: String,
}

/// Capability contract to the token-stream producer.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stable provider identifier (`openai`, `openai-compatible`, …).
    fn provider_name(&self) -> &str;

    /// Open a streaming chat completion.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<TokenStream, LlmError>;
}
