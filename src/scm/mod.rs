//! SCM adapter: read and write access to hosted change requests.
//!
//! Workers only see the [`ScmClient`] capability set; the GitHub and
//! GitLab implementations translate it onto their REST APIs. Reads are
//! idempotent and retried on transient failures; writes carry an
//! idempotency tag so redelivered tasks never duplicate comments (see
//! [`publish`]).

pub mod github;
pub mod gitlab;
pub mod publish;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ProviderKind;

pub use publish::{publish_review, InlineComment, PublishOutcome};

/// Errors from SCM operations.
#[derive(Error, Debug)]
pub enum ScmError {
    #[error("{provider} API error (status {status}): {message}")]
    Http {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("{provider} transport error: {source}")]
    Transport {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} authorization failed: {message}")]
    Auth {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} returned an unexpected payload: {message}")]
    Payload {
        provider: ProviderKind,
        message: String,
    },

    #[error("scm client not configured: {0}")]
    NotConfigured(String),
}

impl ScmError {
    /// Reads may retry on transient transport and server conditions.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScmError::Transport { .. } => true,
            ScmError::Http { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    /// Map an HTTP status + body to the right error variant.
    pub(crate) fn from_status(provider: ProviderKind, status: u16, message: String) -> Self {
        match status {
            401 | 403 => ScmError::Auth { provider, message },
            _ => ScmError::Http {
                provider,
                status,
                message,
            },
        }
    }
}

/// Change-request metadata the workers need.
#[derive(Debug, Clone, Default)]
pub struct ChangeRequestMeta {
    pub title: String,
    pub description: String,
    pub base_branch: String,
    pub head_sha: String,
    /// Diff base SHA, where the provider exposes one (GitLab positions
    /// require it).
    pub base_sha: Option<String>,
    /// Diff start SHA (GitLab).
    pub start_sha: Option<String>,
}

/// Capability set exposed to workers, independent of provider kind.
#[async_trait]
pub trait ScmClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Fetch the change request's unified diff.
    ///
    /// `context_lines` is advisory; providers that always serve their
    /// default context ignore it.
    async fn fetch_diff(
        &self,
        repo: &str,
        number: u64,
        context_lines: u32,
    ) -> Result<String, ScmError>;

    /// Fetch title, description, branches, and SHAs.
    async fn fetch_metadata(&self, repo: &str, number: u64) -> Result<ChangeRequestMeta, ScmError>;

    /// Collect the idempotency tags already present on the change
    /// request's comments.
    async fn list_marker_tags(&self, repo: &str, number: u64) -> Result<HashSet<String>, ScmError>;

    /// Post one inline comment. At-most-once best-effort; the caller
    /// handles failures per comment.
    async fn post_inline_comment(
        &self,
        repo: &str,
        number: u64,
        meta: &ChangeRequestMeta,
        comment: &InlineComment,
    ) -> Result<(), ScmError>;

    /// Post the top-level summary comment.
    async fn post_summary_comment(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ScmError>;
}

/// Maximum read retry attempts.
const READ_MAX_RETRIES: u32 = 3;

/// Initial read retry backoff.
const READ_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Maximum read retry backoff.
const READ_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Run an idempotent read with exponential backoff on transient errors.
pub(crate) async fn with_read_retries<T, F, Fut>(operation: &str, mut call: F) -> Result<T, ScmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ScmError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < READ_MAX_RETRIES => {
                let backoff = READ_INITIAL_BACKOFF
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(READ_MAX_BACKOFF);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "transient SCM read error; retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
