//! Agentic worker: the full-repository review state machine.
//!
//! Drives one task through CLONING → ANALYZING → REASONING → PUBLISHING,
//! recording an action per phase on the immutable [`AgentState`]. Any
//! phase failure transitions to FAILED; the workspace is removed on
//! every exit path.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::aggregate::{aggregate, prioritize::prioritize, AggregatedFindings, PrioritizedFindings};
use crate::diff::parse_unified_diff;
use crate::models::agent::{Action, AgentStatus, AgentTask, TestRunSummary};
use crate::models::finding::ReviewResult;
use crate::models::ReviewRequest;
use crate::scm::publish_review;

use super::detect::{detect_framework, map_test_failures, parse_test_output};
use super::workspace::{clone_url, shallow_clone, Workspace};
use super::{WorkerContext, WorkerError};

/// Deadline for the CLONING phase.
const CLONE_DEADLINE: Duration = Duration::from_secs(300);

/// Deadline for the PUBLISHING phase.
const PUBLISH_DEADLINE: Duration = Duration::from_secs(120);

/// Run one agentic review end to end.
pub async fn process(
    ctx: &WorkerContext,
    request: &ReviewRequest,
    cancel: &CancellationToken,
) -> Result<ReviewResult, WorkerError> {
    let mut task = AgentTask::new(request.clone());
    tracing::info!(
        request_id = %request.request_id,
        task_id = %task.task_id,
        "starting agentic task"
    );

    let workspace = Workspace::create(task.task_id)?;
    let outcome = run_phases(ctx, &mut task, &workspace, cancel).await;

    // Cleanup invariant: the workspace goes away on every exit path.
    workspace.remove();

    match outcome {
        Ok(result) => Ok(result),
        Err(e) => {
            if !e.is_transient() {
                publish_partial_summary(ctx, &task, &e).await;
            }
            match task.state.fail(e.to_string()) {
                Ok(failed) => task.state = failed,
                // Already terminal (a transition raced the failure);
                // only log it.
                Err(state_err) => tracing::error!(
                    task_id = %task.task_id,
                    error = %state_err,
                    "could not record task failure"
                ),
            }
            tracing::warn!(
                task_id = %task.task_id,
                state = %task.state.status,
                error = %e,
                actions = task.state.completed_actions.len(),
                "agentic task failed"
            );
            Err(e)
        }
    }
}

/// The state-machine body, separated so the caller owns cleanup.
async fn run_phases(
    ctx: &WorkerContext,
    task: &mut AgentTask,
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> Result<ReviewResult, WorkerError> {
    let request = task.request.clone();
    let scm = ctx.scm.get(request.provider)?;

    // ── CLONING ─────────────────────────────────────────────────
    task.state = task
        .state
        .start_phase(AgentStatus::Cloning, Action::CloneRepository { commit_hash: None })?;

    let meta = scm
        .fetch_metadata(&request.repository_id, request.change_request_number)
        .await?;

    let provider_cfg = ctx.config.scm.for_provider(request.provider);
    let url = clone_url(
        request.provider,
        &provider_cfg.clone_base,
        &request.repository_id,
        &provider_cfg.token,
    );
    let repo_path = workspace.repo_path();
    let commit_hash = tokio::time::timeout(
        CLONE_DEADLINE,
        shallow_clone(
            &url,
            &provider_cfg.token,
            &meta.head_sha,
            ctx.config.agent.clone_depth,
            &repo_path,
            cancel,
        ),
    )
    .await
    .map_err(|_| WorkerError::PhaseTimeout {
        phase: AgentStatus::Cloning,
    })??;

    task.state = task
        .state
        .with_context("clone_path", serde_json::json!(repo_path.display().to_string()))
        .with_context("commit_hash", serde_json::json!(commit_hash.clone()));
    task.state = task.state.complete_phase(Action::CloneRepository {
        commit_hash: Some(commit_hash),
    })?;

    // ── ANALYZING ───────────────────────────────────────────────
    task.state = task
        .state
        .start_phase(AgentStatus::Analyzing, Action::RunTests { summary: None })?;

    let (test_summary, framework) = analyze(ctx, task, &repo_path, cancel).await?;
    task.state = task.state.with_analysis(test_summary.clone());
    task.state = task.state.complete_phase(Action::RunTests {
        summary: Some(test_summary.clone()),
    })?;

    // ── REASONING ───────────────────────────────────────────────
    task.state = task.state.start_phase(
        AgentStatus::Reasoning,
        Action::InvokeLlmReview { issues: 0, notes: 0 },
    )?;

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
    let llm_review =
        super::diff_mode::review_document(ctx, &request, &doc, ticket.as_ref(), cancel).await?;

    let test_findings = match framework {
        Some(framework) => map_test_failures(framework, &test_summary),
        None => Vec::new(),
    };

    let aggregated = aggregate(
        vec![llm_review.issues, test_findings],
        llm_review.notes,
        llm_review.summary,
        &ctx.aggregation_config(),
    );
    let prioritized = prioritize(&aggregated, &ctx.prioritizer_config());

    let result = ReviewResult {
        summary: build_summary(&aggregated, &prioritized, &test_summary),
        issues: prioritized.into_ordered_issues(),
        notes: aggregated.notes,
        provider: Some(ctx.llm.provider_name().to_string()),
        model: Some(ctx.config.llm.model.clone()),
    };

    task.state = task.state.with_review(result.clone());
    task.state = task.state.complete_phase(Action::InvokeLlmReview {
        issues: result.issues.len(),
        notes: result.notes.len(),
    })?;

    // ── PUBLISHING ──────────────────────────────────────────────
    task.state = task.state.start_phase(
        AgentStatus::Publishing,
        Action::PublishInlineComments {
            posted: 0,
            failed: 0,
            skipped: 0,
        },
    )?;

    let publish = tokio::time::timeout(
        PUBLISH_DEADLINE,
        publish_review(
            scm.as_ref(),
            &request.repository_id,
            request.change_request_number,
            request.request_id,
            &meta,
            &doc,
            &result,
            ctx.config.publish.include_suggested_fix,
        ),
    )
    .await
    .map_err(|_| WorkerError::PhaseTimeout {
        phase: AgentStatus::Publishing,
    })??;

    task.state = task.state.complete_phase(Action::PublishInlineComments {
        posted: publish.posted,
        failed: publish.failed,
        skipped: publish.skipped,
    })?;
    if publish.summary_posted {
        task.state = task.state.complete_phase(Action::PublishSummary)?;
    }

    task.state = task.state.finish()?;
    Ok(result)
}

/// Best-effort partial summary on permanent failure, guarded by
/// `publish.partial_on_failure`: when the LLM review already produced
/// findings before the task died, surface them instead of losing them.
async fn publish_partial_summary(ctx: &WorkerContext, task: &AgentTask, error: &WorkerError) {
    if !ctx.config.publish.partial_on_failure {
        return;
    }
    let Some(review) = &task.state.llm_review_result else {
        return;
    };
    if review.issues.is_empty() {
        return;
    }
    let Ok(scm) = ctx.scm.get(task.request.provider) else {
        return;
    };

    let mut body = format!(
        "## Review incomplete\n\nThe automated review failed before publishing ({error}), \
         but produced {} finding(s) first:\n\n",
        review.issues.len()
    );
    for finding in &review.issues {
        body.push_str(&format!(
            "- `{}:{}` **{}** {}\n",
            finding.file, finding.start_line, finding.severity, finding.title
        ));
    }

    if let Err(e) = scm
        .post_summary_comment(
            &task.request.repository_id,
            task.request.change_request_number,
            &body,
        )
        .await
    {
        tracing::warn!(task_id = %task.task_id, error = %e, "partial summary publication failed");
    }
}

/// The ANALYZING phase: detect the framework and run tests when enabled.
///
/// Missing tests or failed detection is not fatal; it yields an empty
/// summary and the pipeline proceeds. A sandbox wall-clock timeout fails
/// the task.
async fn analyze(
    ctx: &WorkerContext,
    task: &AgentTask,
    repo_path: &std::path::Path,
    cancel: &CancellationToken,
) -> Result<(TestRunSummary, Option<super::detect::TestFramework>), WorkerError> {
    if !ctx.config.agent.tests_enabled {
        tracing::debug!(task_id = %task.task_id, "test execution disabled");
        return Ok((TestRunSummary::default(), None));
    }

    let Some(framework) = detect_framework(repo_path) else {
        tracing::debug!(task_id = %task.task_id, "no test framework detected");
        return Ok((TestRunSummary::default(), None));
    };

    let container = format!("reviewd-{}", task.task_id);
    let outcome = ctx
        .sandbox
        .run(&container, repo_path, &framework.command(), cancel)
        .await?;

    if outcome.timed_out {
        return Err(WorkerError::PhaseTimeout {
            phase: AgentStatus::Analyzing,
        });
    }
    if outcome.exit_code != 0 {
        // Nonzero exit usually just means failing tests; the output is
        // still the signal we came for.
        tracing::debug!(
            task_id = %task.task_id,
            exit_code = outcome.exit_code,
            "test run exited nonzero"
        );
    }

    let duration_ms = outcome.ended_at.saturating_sub(outcome.started_at);
    let summary = parse_test_output(framework, &outcome.stdout, &outcome.stderr, duration_ms);
    tracing::info!(
        task_id = %task.task_id,
        framework = framework.name(),
        total = summary.total_tests,
        failed = summary.failed,
        "test run finished"
    );
    Ok((summary, Some(framework)))
}

/// Rebuild the published summary from the prioritization buckets, with
/// the test-run outcome appended when tests actually ran.
fn build_summary(
    aggregated: &AggregatedFindings,
    prioritized: &PrioritizedFindings,
    tests: &TestRunSummary,
) -> String {
    let mut summary = format!(
        "Automated review found {} issue(s): {}.",
        prioritized.total_included_count,
        prioritized.breakdown()
    );
    if tests.executed {
        summary.push_str(&format!(
            " Tests: {} run, {} passed, {} failed, {} skipped.",
            tests.total_tests, tests.passed, tests.failed, tests.skipped
        ));
    }
    if !aggregated.summary.trim().is_empty() {
        summary.push_str("\n\n");
        summary.push_str(aggregated.summary.trim());
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationConfig;
    use crate::aggregate::prioritize::PrioritizerConfig;
    use crate::models::finding::{Finding, FindingSource, Severity};

    fn finding(severity: Severity, conf: f64) -> Finding {
        Finding {
            file: "a.rs".into(),
            start_line: 1,
            severity,
            title: format!("{severity} issue"),
            suggestion: "fix".into(),
            confidence_score: Some(conf),
            confidence_explanation: None,
            suggested_fix: None,
            source: FindingSource::Llm,
        }
    }

    #[test]
    fn summary_is_rebuilt_from_buckets() {
        let aggregated = aggregate(
            vec![vec![
                finding(Severity::Critical, 0.9),
                finding(Severity::Minor, 0.2),
            ]],
            vec![],
            "LLM prose summary".into(),
            &AggregationConfig::default(),
        );
        let prioritized = prioritize(&aggregated, &PrioritizerConfig::default());
        let tests = TestRunSummary {
            executed: true,
            total_tests: 10,
            passed: 9,
            failed: 1,
            skipped: 0,
            duration_ms: 100,
            failures: vec![],
        };

        let summary = build_summary(&aggregated, &prioritized, &tests);
        assert!(summary.starts_with("Automated review found 1 issue(s)"));
        assert!(summary.contains("1 critical, 0 high, 0 medium, 0 low (1 filtered)"));
        assert!(summary.contains("Tests: 10 run, 9 passed, 1 failed, 0 skipped."));
        assert!(summary.ends_with("LLM prose summary"));
    }

    #[test]
    fn summary_omits_tests_when_not_executed() {
        let aggregated = aggregate(
            vec![],
            vec![],
            String::new(),
            &AggregationConfig::default(),
        );
        let prioritized = prioritize(&aggregated, &PrioritizerConfig::default());
        let summary = build_summary(&aggregated, &prioritized, &TestRunSummary::default());
        assert!(!summary.contains("Tests:"));
        assert!(summary.contains("0 issue(s)"));
    }
}
