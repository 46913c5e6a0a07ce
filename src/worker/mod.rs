//! Review workers: the fixed-size pools that drain the work queue.
//!
//! Each worker runs one task at a time to completion: reclaim stale
//! entries, claim fresh ones, process, publish, then ack. Entries are
//! acked only after a successful publish or a *permanent* failure; a
//! transient failure (or a crash) leaves the entry unacknowledged so the
//! queue redelivers it.

pub mod agentic;
pub mod detect;
pub mod diff_mode;
pub mod workspace;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::aggregate::prioritize::PrioritizerConfig;
use crate::aggregate::AggregationConfig;
use crate::cache::ReviewCache;
use crate::config::Config;
use crate::diff::DiffError;
use crate::llm::{LlmClient, LlmError};
use crate::models::agent::StateError;
use crate::models::finding::ReviewResult;
use crate::models::request::ResultRecord;
use crate::models::{ProviderKind, ReviewMode, ReviewStatus};
use crate::orchestrator::results::ResultStore;
use crate::prompt::{PromptComposer, TicketClient};
use crate::queue::{QueueEntry, StatusChannel, StatusEvent, WorkQueue};
use crate::response::ResponseError;
use crate::sandbox::{SandboxError, SandboxExecutor};
use crate::scm::{ScmClient, ScmError};

/// Permanent-failure backstop: a poison entry delivered this many times
/// is finalized as FAILED instead of being redelivered forever.
const MAX_DELIVERIES: u32 = 5;

/// Errors from worker execution.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("no SCM client configured for {0}")]
    MissingClient(ProviderKind),

    #[error("{phase} phase exceeded its deadline")]
    PhaseTimeout {
        phase: crate::models::agent::AgentStatus,
    },

    #[error("task cancelled")]
    Cancelled,
}

impl WorkerError {
    /// Whether the queue should redeliver the entry (transient) instead
    /// of finalizing the task as FAILED (permanent).
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Scm(e) => e.is_retryable(),
            WorkerError::Llm(e) => e.is_retryable() || matches!(e, LlmError::CircuitOpen),
            WorkerError::Cancelled => true,
            _ => false,
        }
    }
}

/// SCM clients by provider kind.
#[derive(Clone, Default)]
pub struct ScmRegistry {
    github: Option<Arc<dyn ScmClient>>,
    gitlab: Option<Arc<dyn ScmClient>>,
}

impl ScmRegistry {
    pub fn new(
        github: Option<Arc<dyn ScmClient>>,
        gitlab: Option<Arc<dyn ScmClient>>,
    ) -> Self {
        Self { github, gitlab }
    }

    pub fn get(&self, kind: ProviderKind) -> Result<&Arc<dyn ScmClient>, WorkerError> {
        let client = match kind {
            ProviderKind::GitHub => self.github.as_ref(),
            ProviderKind::GitLab => self.gitlab.as_ref(),
        };
        client.ok_or(WorkerError::MissingClient(kind))
    }
}

/// Everything a worker needs, shared across the pools.
pub struct WorkerContext {
    pub config: Config,
    pub diff_queue: Arc<WorkQueue>,
    pub agentic_queue: Arc<WorkQueue>,
    pub status: Arc<StatusChannel>,
    pub results: Arc<ResultStore>,
    pub scm: ScmRegistry,
    pub llm: Arc<LlmClient>,
    pub composer: Arc<PromptComposer>,
    pub cache: Arc<ReviewCache>,
    pub sandbox: Arc<SandboxExecutor>,
    pub ticket: Option<Arc<dyn TicketClient>>,
}

impl WorkerContext {
    pub fn queue_for(&self, mode: ReviewMode) -> &Arc<WorkQueue> {
        match mode {
            ReviewMode::Diff => &self.diff_queue,
            ReviewMode::Agentic => &self.agentic_queue,
        }
    }

    pub(crate) fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig {
            deduplication_enabled: self.config.agent.aggregation.deduplication_enabled,
            similarity_threshold: self.config.agent.aggregation.similarity_threshold,
            line_tolerance: self.config.agent.aggregation.line_tolerance,
            similarity: self.config.agent.aggregation.similarity,
        }
    }

    pub(crate) fn prioritizer_config(&self) -> PrioritizerConfig {
        PrioritizerConfig {
            min_confidence: self.config.agent.aggregation.min_confidence,
            max_issues_per_file: self.config.agent.aggregation.max_issues_per_file,
        }
    }
}

/// Spawn the configured worker pools and run them until cancellation.
pub async fn run_pools(ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    let mut handles = Vec::new();

    for n in 0..ctx.config.workers.diff_count.max(1) {
        let consumer = format!("{}-diff-{n}", ctx.config.queue.consumer_id);
        handles.push(tokio::spawn(worker_loop(
            ctx.clone(),
            ReviewMode::Diff,
            consumer,
            cancel.clone(),
        )));
    }
    for n in 0..ctx.config.workers.agentic_count.max(1) {
        let consumer = format!("{}-agentic-{n}", ctx.config.queue.consumer_id);
        handles.push(tokio::spawn(worker_loop(
            ctx.clone(),
            ReviewMode::Agentic,
            consumer,
            cancel.clone(),
        )));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

/// One worker's claim-process-ack loop.
async fn worker_loop(
    ctx: Arc<WorkerContext>,
    mode: ReviewMode,
    consumer_id: String,
    cancel: CancellationToken,
) {
    let queue = ctx.queue_for(mode).clone();
    let block = Duration::from_millis(ctx.config.queue.claim_block_timeout_ms);
    let min_idle = Duration::from_millis(ctx.config.queue.min_idle_reclaim_ms);
    let batch = ctx.config.queue.batch_size.max(1);

    tracing::info!(
        consumer = %consumer_id,
        group = %ctx.config.queue.consumer_group,
        stream = %ctx.config.queue.stream_key,
        %mode,
        "worker started"
    );

    while !cancel.is_cancelled() {
        let mut entries = queue.reclaim(&consumer_id, min_idle);
        if entries.is_empty() {
            entries = tokio::select! {
                _ = cancel.cancelled() => break,
                claimed = queue.claim(&consumer_id, batch, block) => claimed,
            };
        }

        for entry in entries {
            if cancel.is_cancelled() {
                // Leave unacked: the entry will be reclaimed elsewhere.
                break;
            }
            process_entry(&ctx, mode, entry, &cancel).await;
        }
    }

    tracing::info!(consumer = %consumer_id, %mode, "worker stopped");
}

/// Process one claimed entry end to end and settle it on the queue.
async fn process_entry(
    ctx: &WorkerContext,
    mode: ReviewMode,
    entry: QueueEntry,
    cancel: &CancellationToken,
) {
    let request = entry.payload.clone();
    let request_id = request.request_id;
    let queue = ctx.queue_for(mode);
    let started = Instant::now();

    tracing::info!(
        %request_id,
        provider = %request.provider,
        repo = %request.repository_id,
        number = request.change_request_number,
        delivery = entry.delivery_count,
        "processing review request"
    );
    ctx.status.emit(request_id, StatusEvent::Started);
    ctx.results.mark_started(&request);

    let outcome = match mode {
        ReviewMode::Diff => diff_mode::process(ctx, &request, cancel).await,
        ReviewMode::Agentic => agentic::process(ctx, &request, cancel).await,
    };

    match outcome {
        Ok(result) => {
            let record = completed_record(&request, &result, started.elapsed());
            ctx.results.finalize(request_id, record);
            ctx.status.emit(request_id, StatusEvent::Completed);
            queue.ack(&[entry.entry_id]);
            tracing::info!(%request_id, issues = result.issues.len(), "review completed");
        }
        Err(e) if e.is_transient() && entry.delivery_count < MAX_DELIVERIES => {
            // Leave unacknowledged: redelivered after min-idle.
            tracing::warn!(%request_id, error = %e, "transient failure; leaving entry for redelivery");
        }
        Err(e) => {
            let message = e.to_string();
            let record = failed_record(&request, &message, started.elapsed());
            ctx.results.finalize(request_id, record);
            ctx.status
                .emit(request_id, StatusEvent::Failed { error: message });
            queue.ack(&[entry.entry_id]);
            tracing::error!(%request_id, error = %e, "review failed");
        }
    }
}

fn completed_record(
    request: &crate::models::ReviewRequest,
    result: &ReviewResult,
    elapsed: Duration,
) -> ResultRecord {
    ResultRecord {
        status: ReviewStatus::Completed,
        result: Some(result.clone()),
        error: None,
        processing_time_ms: elapsed.as_millis() as u64,
        completed_at: Some(chrono::Utc::now()),
        failed_at: None,
        provider: request.provider.to_string(),
        repository_id: request.repository_id.clone(),
        change_request_number: request.change_request_number,
        llm_provider: result.provider.clone(),
        llm_model: result.model.clone(),
    }
}

fn failed_record(
    request: &crate::models::ReviewRequest,
    error: &str,
    elapsed: Duration,
) -> ResultRecord {
    ResultRecord {
        status: ReviewStatus::Failed,
        result: None,
        error: Some(error.to_string()),
        processing_time_ms: elapsed.as_millis() as u64,
        completed_at: None,
        failed_at: Some(chrono::Utc::now()),
        provider: request.provider.to_string(),
        repository_id: request.repository_id.clone(),
        change_request_number: request.change_request_number,
        llm_provider: None,
        llm_model: None,
    }
}
