//! Integration tests for the review pipeline.
//!
//! Exercise the queue → worker → publish path end-to-end with a mock
//! LLM backend and a mock SCM client, without real network access.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use reviewd::cache::ReviewCache;
use reviewd::config::Config;
use reviewd::llm::{
    ChatBackend, ChatRequest, CircuitBreaker, FinishReason, LlmClient, LlmClientConfig, LlmError,
    StreamEvent, TokenStream,
};
use reviewd::models::{ProviderKind, ReviewMode, ReviewStatus};
use reviewd::orchestrator::{ResultStore, ReviewService};
use reviewd::prompt::PromptComposer;
use reviewd::queue::{StatusChannel, StatusEvent, WorkQueue};
use reviewd::sandbox::{SandboxConfig, SandboxExecutor};
use reviewd::scm::{ChangeRequestMeta, InlineComment, ScmClient, ScmError};
use reviewd::worker::{run_pools, ScmRegistry, WorkerContext};

const SAMPLE_DIFF: &str = "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1,2 +1,3 @@\n fn existing() {}\n+fn added() { let x = 1; }\n fn tail() {}\n";

const VALID_REVIEW: &str = r#"{
    "summary": "One issue found.",
    "issues": [{
        "file": "src/lib.rs",
        "start_line": 2,
        "severity": "major",
        "title": "Unused variable x",
        "suggestion": "Remove x.",
        "confidenceScore": 0.9
    }],
    "non_blocking_notes": [{"file": "src/lib.rs", "line": 2, "note": "Consider docs."}]
}"#;

/// Mock LLM backend replaying canned responses, one per call.
struct MockBackend {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
    captured_systems: Mutex<Vec<String>>,
}

impl MockBackend {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: AtomicUsize::new(0),
            captured_systems: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<TokenStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.captured_systems
            .lock()
            .unwrap()
            .push(request.system.clone());

        let mut responses = self.responses.lock().unwrap();
        let text = if responses.is_empty() {
            VALID_REVIEW.to_string()
        } else {
            responses.remove(0)
        };

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            // Stream in two deltas to exercise accumulation.
            let mid = text.len() / 2;
            let _ = tx.send(Ok(StreamEvent::Delta(text[..mid].to_string()))).await;
            let _ = tx.send(Ok(StreamEvent::Delta(text[mid..].to_string()))).await;
            let _ = tx.send(Ok(StreamEvent::Finish(FinishReason::Stop))).await;
        });
        Ok(rx)
    }
}

/// Mock SCM client serving a fixed change request and recording writes.
struct MockScm {
    diff: String,
    head_sha: Mutex<String>,
    existing_tags: Mutex<HashSet<String>>,
    inline_comments: Mutex<Vec<InlineComment>>,
    summaries: Mutex<Vec<String>>,
}

impl MockScm {
    fn new(diff: &str) -> Self {
        Self {
            diff: diff.to_string(),
            head_sha: Mutex::new("headsha1".to_string()),
            existing_tags: Mutex::new(HashSet::new()),
            inline_comments: Mutex::new(Vec::new()),
            summaries: Mutex::new(Vec::new()),
        }
    }

    fn set_head_sha(&self, head: &str) {
        *self.head_sha.lock().unwrap() = head.to_string();
    }
}

#[async_trait]
impl ScmClient for MockScm {
    fn provider(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn fetch_diff(&self, _: &str, _: u64, _: u32) -> Result<String, ScmError> {
        Ok(self.diff.clone())
    }

    async fn fetch_metadata(&self, _: &str, _: u64) -> Result<ChangeRequestMeta, ScmError> {
        Ok(ChangeRequestMeta {
            title: "Add helper".into(),
            description: "Adds a helper function.".into(),
            base_branch: "main".into(),
            head_sha: self.head_sha.lock().unwrap().clone(),
            base_sha: Some("basesha1".into()),
            start_sha: None,
        })
    }

    async fn list_marker_tags(&self, _: &str, _: u64) -> Result<HashSet<String>, ScmError> {
        Ok(self.existing_tags.lock().unwrap().clone())
    }

    async fn post_inline_comment(
        &self,
        _: &str,
        _: u64,
        _: &ChangeRequestMeta,
        comment: &InlineComment,
    ) -> Result<(), ScmError> {
        self.existing_tags.lock().unwrap().insert(comment.tag.clone());
        self.inline_comments.lock().unwrap().push(comment.clone());
        Ok(())
    }

    async fn post_summary_comment(&self, _: &str, _: u64, body: &str) -> Result<(), ScmError> {
        self.existing_tags
            .lock()
            .unwrap()
            .extend(reviewd::scm::publish::extract_marker_tags(body));
        self.summaries.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

/// Build a worker context around the given mocks, with fast queue
/// timings for tests.
fn build_context(
    backend: Arc<MockBackend>,
    scm: Arc<MockScm>,
) -> (Arc<WorkerContext>, ReviewService) {
    let mut config = Config::default();
    config.queue.claim_block_timeout_ms = 20;
    config.queue.min_idle_reclaim_ms = 10_000;
    config.workers.diff_count = 1;
    config.workers.agentic_count = 1;
    config.cache.enabled = false;
    config.agent.tests_enabled = false;
    config.llm.model = "mock-model".into();

    let diff_queue = Arc::new(WorkQueue::new(config.queue.high_water_mark));
    let agentic_queue = Arc::new(WorkQueue::new(config.queue.high_water_mark));
    let status = Arc::new(StatusChannel::default());
    let results = Arc::new(ResultStore::new(Duration::from_secs(60)));

    let llm = Arc::new(LlmClient::new(
        backend,
        LlmClientConfig {
            timeout: Duration::from_secs(5),
            max_retries: 1,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
        CircuitBreaker::default(),
    ));

    let composer = Arc::new(
        PromptComposer::new("rust", "correctness", Some(r"\b([A-Z]+-\d+)\b"), &[]).unwrap(),
    );

    let service = ReviewService::new(
        diff_queue.clone(),
        agentic_queue.clone(),
        status.clone(),
        results.clone(),
    );

    let ctx = Arc::new(WorkerContext {
        config,
        diff_queue,
        agentic_queue,
        status,
        results,
        scm: ScmRegistry::new(Some(scm), None),
        llm,
        composer,
        cache: Arc::new(ReviewCache::disabled()),
        sandbox: Arc::new(SandboxExecutor::new(SandboxConfig::default(), vec![])),
        ticket: None,
    });

    (ctx, service)
}

/// Wait until the request reaches a terminal record, or panic.
async fn wait_for_terminal(
    service: &ReviewService,
    id: reviewd::models::RequestId,
) -> reviewd::models::request::ResultRecord {
    for _ in 0..200 {
        if let Some(record) = service.result(id) {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("request {id} never reached a terminal state");
}

#[tokio::test]
async fn diff_review_completes_and_publishes() {
    let backend = Arc::new(MockBackend::new(vec![VALID_REVIEW]));
    let scm = Arc::new(MockScm::new(SAMPLE_DIFF));
    let (ctx, service) = build_context(backend.clone(), scm.clone());

    let cancel = CancellationToken::new();
    let pools = tokio::spawn(run_pools(ctx, cancel.clone()));

    let id = service
        .create_review(ProviderKind::GitHub, "acme/api", 42, ReviewMode::Diff)
        .unwrap();
    let record = wait_for_terminal(&service, id).await;

    cancel.cancel();
    let _ = pools.await;

    assert_eq!(record.status, ReviewStatus::Completed);
    let result = record.result.expect("completed record carries the result");
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].title, "Unused variable x");
    assert_eq!(result.provider.as_deref(), Some("mock"));
    assert_eq!(result.model.as_deref(), Some("mock-model"));
    assert_eq!(record.llm_provider.as_deref(), Some("mock"));

    // One inline comment, anchored at the added line's diff position.
    let inline = scm.inline_comments.lock().unwrap();
    assert_eq!(inline.len(), 1);
    assert_eq!(inline[0].file, "src/lib.rs");
    assert_eq!(inline[0].line, 2);
    assert_eq!(inline[0].position, Some(3));
    assert!(inline[0].body.contains("Unused variable x"));

    // One summary with the notes and the priority breakdown.
    let summaries = scm.summaries.lock().unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].contains("One issue found."));
    assert!(summaries[0].contains("| high | 1 |"));
    assert!(summaries[0].contains("Consider docs."));

    // The queue is drained.
    assert_eq!(service.queue_depth(ReviewMode::Diff), 0);
}

#[tokio::test]
async fn subscribers_see_started_chunks_and_completed() {
    let backend = Arc::new(MockBackend::new(vec![VALID_REVIEW]));
    let scm = Arc::new(MockScm::new(SAMPLE_DIFF));
    let (ctx, service) = build_context(backend, scm);

    // Enqueue before starting the pool so the subscription is in place
    // when processing begins.
    let id = service
        .create_review(ProviderKind::GitHub, "acme/api", 42, ReviewMode::Diff)
        .unwrap();
    let mut rx = service.subscribe(id);

    let cancel = CancellationToken::new();
    let pools = tokio::spawn(run_pools(ctx, cancel.clone()));
    let record = wait_for_terminal(&service, id).await;
    cancel.cancel();
    let _ = pools.await;
    assert_eq!(record.status, ReviewStatus::Completed);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.first(), Some(&StatusEvent::Started));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, StatusEvent::Chunk { .. })),
        "LLM deltas surface as chunk events"
    );
    assert_eq!(events.last(), Some(&StatusEvent::Completed));
}

#[tokio::test]
async fn invalid_json_retries_once_with_strict_directive() {
    let backend = Arc::new(MockBackend::new(vec![
        "this is not json at all",
        VALID_REVIEW,
    ]));
    let scm = Arc::new(MockScm::new(SAMPLE_DIFF));
    let (ctx, service) = build_context(backend.clone(), scm);

    let cancel = CancellationToken::new();
    let pools = tokio::spawn(run_pools(ctx, cancel.clone()));
    let id = service
        .create_review(ProviderKind::GitHub, "acme/api", 42, ReviewMode::Diff)
        .unwrap();
    let record = wait_for_terminal(&service, id).await;
    cancel.cancel();
    let _ = pools.await;

    assert_eq!(record.status, ReviewStatus::Completed);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

    let systems = backend.captured_systems.lock().unwrap();
    assert!(!systems[0].contains("Return ONLY"));
    assert!(
        systems[1].contains("Return ONLY"),
        "retry carries the strict-JSON directive"
    );
}

#[tokio::test]
async fn invalid_json_twice_fails_the_task() {
    let backend = Arc::new(MockBackend::new(vec!["garbage one", "garbage two"]));
    let scm = Arc::new(MockScm::new(SAMPLE_DIFF));
    let (ctx, service) = build_context(backend, scm.clone());

    let cancel = CancellationToken::new();
    let pools = tokio::spawn(run_pools(ctx, cancel.clone()));
    let id = service
        .create_review(ProviderKind::GitHub, "acme/api", 42, ReviewMode::Diff)
        .unwrap();
    let record = wait_for_terminal(&service, id).await;
    cancel.cancel();
    let _ = pools.await;

    assert_eq!(record.status, ReviewStatus::Failed);
    assert!(record.error.unwrap().contains("invalid LLM response"));
    assert!(scm.inline_comments.lock().unwrap().is_empty());
}

#[tokio::test]
async fn redelivered_publish_is_idempotent() {
    // First run: normal completion which leaves marker tags behind on
    // the mock provider.
    let backend = Arc::new(MockBackend::new(vec![VALID_REVIEW, VALID_REVIEW]));
    let scm = Arc::new(MockScm::new(SAMPLE_DIFF));
    let (ctx, service) = build_context(backend, scm.clone());

    let cancel = CancellationToken::new();
    let pools = tokio::spawn(run_pools(ctx.clone(), cancel.clone()));
    let id = service
        .create_review(ProviderKind::GitHub, "acme/api", 42, ReviewMode::Diff)
        .unwrap();
    wait_for_terminal(&service, id).await;

    // Simulate redelivery of the same request after a crash: publish the
    // same review again through the adapter.
    let request = reviewd::models::ReviewRequest {
        request_id: id,
        provider: ProviderKind::GitHub,
        repository_id: "acme/api".into(),
        change_request_number: 42,
        mode: ReviewMode::Diff,
        created_at: 0,
    };
    let result = reviewd::worker::diff_mode::process(&ctx, &request, &CancellationToken::new())
        .await
        .unwrap();
    cancel.cancel();
    let _ = pools.await;

    assert_eq!(result.issues.len(), 1);
    // The second publish skipped everything already present: still one
    // inline comment and one summary.
    assert_eq!(scm.inline_comments.lock().unwrap().len(), 1);
    assert_eq!(scm.summaries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn agentic_review_clones_and_completes() {
    // Local git fixture standing in for the hosted repository.
    let fixture = tempfile::tempdir().unwrap();
    let origin = fixture.path().join("acme").join("api.git");
    std::fs::create_dir_all(&origin).unwrap();
    let git = |args: &[&str]| {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(&origin)
            .env("GIT_AUTHOR_NAME", "t")
            .env("GIT_AUTHOR_EMAIL", "t@example.com")
            .env("GIT_COMMITTER_NAME", "t")
            .env("GIT_COMMITTER_EMAIL", "t@example.com")
            .output()
            .expect("git must be available");
        assert!(
            output.status.success(),
            "git {args:?}: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    };
    git(&["init", "--quiet", "--initial-branch=main"]);
    std::fs::write(origin.join("lib.rs"), "fn existing() {}\n").unwrap();
    git(&["add", "."]);
    git(&["commit", "--quiet", "-m", "initial"]);

    let backend = Arc::new(MockBackend::new(vec![VALID_REVIEW]));
    let scm = Arc::new(MockScm::new(SAMPLE_DIFF));
    // The fixture is fetched by branch name rather than a SHA.
    scm.set_head_sha("main");
    let (ctx, service) = build_context(backend, scm.clone());

    // Point cloning at the fixture.
    let mut config = ctx.config.clone();
    config.scm.github.clone_base = format!("file://{}", fixture.path().display());
    let ctx = Arc::new(WorkerContext {
        config,
        diff_queue: ctx.diff_queue.clone(),
        agentic_queue: ctx.agentic_queue.clone(),
        status: ctx.status.clone(),
        results: ctx.results.clone(),
        scm: ScmRegistry::new(Some(scm.clone()), None),
        llm: ctx.llm.clone(),
        composer: ctx.composer.clone(),
        cache: ctx.cache.clone(),
        sandbox: ctx.sandbox.clone(),
        ticket: None,
    });

    let cancel = CancellationToken::new();
    let pools = tokio::spawn(run_pools(ctx, cancel.clone()));
    let id = service
        .create_review(ProviderKind::GitHub, "acme/api", 42, ReviewMode::Agentic)
        .unwrap();
    let record = wait_for_terminal(&service, id).await;
    cancel.cancel();
    let _ = pools.await;

    assert_eq!(record.status, ReviewStatus::Completed, "error: {:?}", record.error);
    let result = record.result.unwrap();
    // The agentic summary is rebuilt from the prioritization buckets.
    assert!(result.summary.starts_with("Automated review found 1 issue(s)"));
    assert_eq!(result.issues.len(), 1);
    assert_eq!(scm.summaries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_scm_client_fails_the_task() {
    let backend = Arc::new(MockBackend::new(vec![VALID_REVIEW]));
    let scm = Arc::new(MockScm::new(SAMPLE_DIFF));
    let (ctx, service) = build_context(backend, scm);

    // GitLab has no configured client in the test registry.
    let cancel = CancellationToken::new();
    let pools = tokio::spawn(run_pools(ctx, cancel.clone()));
    let id = service
        .create_review(ProviderKind::GitLab, "grp/api", 1, ReviewMode::Diff)
        .unwrap();
    let record = wait_for_terminal(&service, id).await;
    cancel.cancel();
    let _ = pools.await;

    assert_eq!(record.status, ReviewStatus::Failed);
    assert!(record.error.unwrap().contains("no SCM client configured"));
}
