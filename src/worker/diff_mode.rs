//! Diff-mode worker: the lightweight review path.
//!
//! Fetch the diff and metadata, chunk the diff, review each chunk
//! through the LLM (with one strict-JSON retry on validation failure),
//! merge the chunk reviews, and publish.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache;
use crate::diff::{chunk_document, parse_unified_diff, to_unified};
use crate::llm::ChatRequest;
use crate::models::diff::DiffDocument;
use crate::models::finding::ReviewResult;
use crate::models::ReviewRequest;
use crate::prompt::TicketContext;
use crate::queue::StatusEvent;
use crate::response::{parse_review, ParsedReview};
use crate::scm::publish_review;

use super::{WorkerContext, WorkerError};

/// Separator between merged chunk summaries.
const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

/// Run one diff-mode review end to end (publish included).
pub async fn process(
    ctx: &WorkerContext,
    request: &ReviewRequest,
    cancel: &CancellationToken,
) -> Result<ReviewResult, WorkerError> {
    let scm = ctx.scm.get(request.provider)?;

    let meta = scm
        .fetch_metadata(&request.repository_id, request.change_request_number)
        .await?;
    let diff_text = scm
        .fetch_diff(
            &request.repository_id,
            request.change_request_number,
            ctx.config.diff.context_lines,
        )
        .await?;
    let doc = parse_unified_diff(&diff_text)?;

    let ticket = ctx
        .composer
        .resolve_ticket(&meta.title, &meta.description, ctx.ticket.as_deref())
        .await;

    let mut result = review_document(ctx, request, &doc, ticket.as_ref(), cancel).await?;
    result.provider = Some(ctx.llm.provider_name().to_string());
    result.model = Some(ctx.config.llm.model.clone());

    publish_review(
        scm.as_ref(),
        &request.repository_id,
        request.change_request_number,
        request.request_id,
        &meta,
        &doc,
        &result,
        ctx.config.publish.include_suggested_fix,
    )
    .await?;

    Ok(result)
}

/// Review a parsed diff document chunk by chunk and merge the results.
///
/// Shared between the diff worker and the agentic worker's REASONING
/// phase; the returned result carries no provider/model attribution.
pub(crate) async fn review_document(
    ctx: &WorkerContext,
    request: &ReviewRequest,
    doc: &DiffDocument,
    ticket: Option<&TicketContext>,
    cancel: &CancellationToken,
) -> Result<ReviewResult, WorkerError> {
    let chunks: Vec<DiffDocument> =
        chunk_document(doc, ctx.config.diff.max_lines_per_chunk).collect();
    tracing::debug!(
        request_id = %request.request_id,
        files = doc.files.len(),
        chunks = chunks.len(),
        "reviewing diff"
    );

    let mut reviews: Vec<ParsedReview> = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        reviews.push(review_chunk(ctx, request, chunk, ticket, cancel).await?);
    }

    Ok(merge_reviews(reviews))
}

/// Review one chunk, consulting the result cache first.
///
/// A validation failure triggers exactly one retry with the strict-JSON
/// directive appended; the second failure propagates and fails the task.
async fn review_chunk(
    ctx: &WorkerContext,
    request: &ReviewRequest,
    chunk: &DiffDocument,
    ticket: Option<&TicketContext>,
    cancel: &CancellationToken,
) -> Result<ParsedReview, WorkerError> {
    let chunk_text = to_unified(chunk);
    let first_file = chunk
        .files
        .first()
        .map(|f| f.path().to_string())
        .unwrap_or_default();
    let cache_key = cache::cache_key(&chunk_text, &ctx.config.prompt.language, &first_file);

    if let Some(cached) = ctx.cache.get(&cache_key) {
        tracing::debug!(request_id = %request.request_id, file = %first_file, "review cache hit");
        return Ok(cached);
    }

    let user_prompt = ctx.composer.user_prompt(chunk, &[], ticket);
    let system_prompt = ctx.composer.system_prompt();

    let outcome = complete_with_progress(ctx, request, &system_prompt, &user_prompt, cancel).await?;

    let review = match parse_review(&outcome.text) {
        Ok(review) => review,
        Err(first_err) => {
            tracing::warn!(
                request_id = %request.request_id,
                error = %first_err,
                "invalid LLM response; retrying with strict directive"
            );
            let strict_system = format!(
                "{system_prompt}{}",
                crate::prompt::PromptComposer::strict_retry_suffix()
            );
            let retry =
                complete_with_progress(ctx, request, &strict_system, &user_prompt, cancel).await?;
            parse_review(&retry.text)?
        }
    };

    ctx.cache.put(&cache_key, &review);
    Ok(review)
}

/// Call the LLM, forwarding deltas to the request's status channel.
async fn complete_with_progress(
    ctx: &WorkerContext,
    request: &ReviewRequest,
    system: &str,
    user: &str,
    cancel: &CancellationToken,
) -> Result<crate::llm::ChatOutcome, WorkerError> {
    let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
    let status = ctx.status.clone();
    let request_id = request.request_id;
    let forwarder = tokio::spawn(async move {
        while let Some(text) = delta_rx.recv().await {
            status.emit(request_id, StatusEvent::Chunk { text });
        }
    });

    let chat = ChatRequest {
        system: system.to_string(),
        user: user.to_string(),
        model: ctx.config.llm.model.clone(),
        temperature: ctx.config.llm.temperature,
    };
    let outcome = ctx.llm.complete(&chat, cancel, Some(delta_tx)).await;
    let _ = forwarder.await;
    Ok(outcome?)
}

/// Merge chunk reviews: summaries joined by a separator, issues and
/// notes unioned in order.
fn merge_reviews(reviews: Vec<ParsedReview>) -> ReviewResult {
    let mut summaries = Vec::new();
    let mut issues = Vec::new();
    let mut notes = Vec::new();

    for review in reviews {
        if !review.summary.trim().is_empty() {
            summaries.push(review.summary);
        }
        issues.extend(review.issues);
        notes.extend(review.notes);
    }

    ReviewResult {
        summary: summaries.join(SUMMARY_SEPARATOR),
        issues,
        notes,
        provider: None,
        model: None,
    }
}
