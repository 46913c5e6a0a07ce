//! Idempotent review publication.
//!
//! Formats findings into inline comments plus a summary comment, skips
//! comments whose idempotency tag is already present on the change
//! request, and rolls findings whose position cannot be resolved into
//! the summary as "unlocated findings". A failed individual inline
//! comment is logged and counted but never aborts the batch.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::diff::map_position;
use crate::models::diff::DiffDocument;
use crate::models::finding::{Finding, ReviewResult, Severity};
use crate::models::request::RequestId;

use super::{ChangeRequestMeta, ScmClient, ScmError};

/// Marker wrapping an idempotency tag inside a comment body. Hidden in
/// rendered markdown.
const MARKER_PREFIX: &str = "<!-- reviewd:tag=";
const MARKER_SUFFIX: &str = " -->";

/// One inline comment ready to post.
#[derive(Debug, Clone)]
pub struct InlineComment {
    pub file: String,
    /// New-file line number.
    pub line: u32,
    /// File-scoped diff position (provider kind A addressing). `None`
    /// when the line is not represented in the diff.
    pub position: Option<u32>,
    pub body: String,
    pub tag: String,
}

/// Outcome counters for one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Inline comments successfully posted.
    pub posted: usize,
    /// Inline comments that failed to post.
    pub failed: usize,
    /// Inline comments skipped because their tag already exists.
    pub skipped: usize,
    /// Findings that could not be anchored and went into the summary.
    pub unlocated: usize,
    /// Whether the summary comment was posted.
    pub summary_posted: bool,
}

/// Deterministic idempotency tag for a finding.
///
/// Derived from `(request_id, file, start_line, hash(title))` so a
/// redelivered task re-publishing the same finding produces the same
/// tag.
pub fn idempotency_tag(request_id: RequestId, finding: &Finding) -> String {
    let title_hash = hex::encode(Sha256::digest(finding.title.as_bytes()));
    let mut hasher = Sha256::new();
    hasher.update(request_id.to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(finding.file.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(finding.start_line.to_le_bytes());
    hasher.update(b"\x1f");
    hasher.update(title_hash.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Render the hidden marker for a tag.
pub fn marker(tag: &str) -> String {
    format!("{MARKER_PREFIX}{tag}{MARKER_SUFFIX}")
}

/// Extract every marker tag present in a comment body.
pub fn extract_marker_tags(body: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(MARKER_PREFIX) {
        let after = &rest[start + MARKER_PREFIX.len()..];
        match after.find(MARKER_SUFFIX) {
            Some(end) => {
                tags.push(after[..end].to_string());
                rest = &after[end + MARKER_SUFFIX.len()..];
            }
            None => break,
        }
    }
    tags
}

/// Render one finding as an inline comment body.
fn render_inline_body(finding: &Finding, include_suggested_fix: bool, tag: &str) -> String {
    let mut body = format!("**{}** `{}`\n\n{}", finding.severity, finding.title, finding.suggestion);
    if let Some(score) = finding.confidence_score {
        body.push_str(&format!("\n\nConfidence: {score:.2}"));
        if let Some(ref explanation) = finding.confidence_explanation {
            body.push_str(&format!(" — {explanation}"));
        }
    }
    if include_suggested_fix {
        if let Some(ref fix) = finding.suggested_fix {
            body.push_str(&format!("\n\n```suggestion\n{fix}\n```"));
        }
    }
    body.push_str("\n\n");
    body.push_str(&marker(tag));
    body
}

/// Render the summary comment: the review summary, a priority breakdown,
/// and any unlocated findings.
fn render_summary_body(
    request_id: RequestId,
    result: &ReviewResult,
    unlocated: &[&Finding],
) -> String {
    let mut counts = [0usize; 4];
    for issue in &result.issues {
        let idx = match issue.severity {
            Severity::Critical => 0,
            Severity::Major => 1,
            Severity::Minor => 2,
            Severity::Info => 3,
        };
        counts[idx] += 1;
    }

    let mut body = String::from("## Review summary\n\n");
    body.push_str(&result.summary);
    body.push_str("\n\n");
    body.push_str("| Priority | Count |\n|---|---|\n");
    body.push_str(&format!("| critical | {} |\n", counts[0]));
    body.push_str(&format!("| high | {} |\n", counts[1]));
    body.push_str(&format!("| medium | {} |\n", counts[2]));
    body.push_str(&format!("| low | {} |\n", counts[3]));

    if !unlocated.is_empty() {
        body.push_str("\n### Unlocated findings\n\n");
        body.push_str(
            "These findings reference lines outside the visible diff and \
             could not be attached inline:\n\n",
        );
        for finding in unlocated {
            body.push_str(&format!(
                "- `{}:{}` **{}** {} — {}\n",
                finding.file, finding.start_line, finding.severity, finding.title,
                finding.suggestion
            ));
        }
    }

    if !result.notes.is_empty() {
        body.push_str("\n### Notes\n\n");
        for note in &result.notes {
            body.push_str(&format!("- `{}:{}` {}\n", note.file, note.line, note.text));
        }
    }

    if let (Some(provider), Some(model)) = (&result.provider, &result.model) {
        body.push_str(&format!("\n_Reviewed by {provider}/{model}._\n"));
    }
    body.push_str(&format!("\n{}", marker(&summary_tag(request_id))));
    body
}

/// Tag guarding the summary comment against duplicate publication.
fn summary_tag(request_id: RequestId) -> String {
    let digest = Sha256::digest(format!("{request_id}\x1fsummary").as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Plan the inline comments for a result: anchor each finding, compute
/// tags, and split off the unlocatable ones.
///
/// GitHub anchors by diff position, GitLab by line + SHAs; either way a
/// line that is not on the new side of the diff cannot host an inline
/// comment, so both kinds share the same anchoring test.
pub fn plan_comments<'a>(
    request_id: RequestId,
    doc: &DiffDocument,
    result: &'a ReviewResult,
    include_suggested_fix: bool,
) -> (Vec<InlineComment>, Vec<&'a Finding>) {
    let mut comments = Vec::new();
    let mut unlocated = Vec::new();

    for finding in &result.issues {
        let position = map_position(doc, &finding.file, finding.start_line);
        if position.is_none() {
            unlocated.push(finding);
            continue;
        }
        let tag = idempotency_tag(request_id, finding);
        comments.push(InlineComment {
            file: finding.file.clone(),
            line: finding.start_line,
            position,
            body: render_inline_body(finding, include_suggested_fix, &tag),
            tag,
        });
    }

    (comments, unlocated)
}

/// Publish a review result to the change request.
///
/// Existing marker tags are fetched first so redeliveries skip
/// already-present comments (including the summary).
pub async fn publish_review(
    client: &dyn ScmClient,
    repo: &str,
    number: u64,
    request_id: RequestId,
    meta: &ChangeRequestMeta,
    doc: &DiffDocument,
    result: &ReviewResult,
    include_suggested_fix: bool,
) -> Result<PublishOutcome, ScmError> {
    let existing: HashSet<String> = client.list_marker_tags(repo, number).await?;

    let (comments, unlocated) = plan_comments(request_id, doc, result, include_suggested_fix);

    let mut outcome = PublishOutcome {
        unlocated: unlocated.len(),
        ..PublishOutcome::default()
    };

    for comment in &comments {
        if existing.contains(&comment.tag) {
            tracing::debug!(tag = %comment.tag, file = %comment.file, "skipping duplicate inline comment");
            outcome.skipped += 1;
            continue;
        }
        match client
            .post_inline_comment(repo, number, meta, comment)
            .await
        {
            Ok(()) => outcome.posted += 1,
            Err(e) => {
                tracing::warn!(
                    file = %comment.file,
                    line = comment.line,
                    error = %e,
                    "failed to post inline comment; continuing"
                );
                outcome.failed += 1;
            }
        }
    }

    if existing.contains(&summary_tag(request_id)) {
        tracing::debug!("summary comment already present; skipping");
    } else {
        let body = render_summary_body(request_id, result, &unlocated);
        client.post_summary_comment(repo, number, &body).await?;
        outcome.summary_posted = true;
    }

    Ok(outcome)
}
