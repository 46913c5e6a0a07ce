//! reviewd daemon entry point.
//!
//! Loads configuration, wires the pipeline (queues, workers, LLM client,
//! SCM clients), and runs the worker pools until shutdown. The HTTP
//! ingest layer mounts on top of [`reviewd::orchestrator::ReviewService`];
//! for headless operation `--enqueue` seeds requests directly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use reviewd::cache::ReviewCache;
use reviewd::config::Config;
use reviewd::env::Env;
use reviewd::llm::{BreakerConfig, CircuitBreaker, LlmClient, LlmClientConfig};
use reviewd::llm::sse::OpenAiBackend;
use reviewd::models::{ProviderKind, ReviewMode};
use reviewd::orchestrator::{ResultStore, ReviewService};
use reviewd::prompt::PromptComposer;
use reviewd::queue::{StatusChannel, WorkQueue};
use reviewd::sandbox::{SandboxConfig, SandboxExecutor};
use reviewd::scm::github::GitHubClient;
use reviewd::scm::gitlab::GitLabClient;
use reviewd::scm::ScmClient;
use reviewd::worker::{run_pools, ScmRegistry, WorkerContext};

/// AI-assisted code review pipeline daemon.
#[derive(Debug, Parser)]
#[command(name = "reviewd", version, about)]
struct Args {
    /// Path to a reviewd.toml (defaults to ./reviewd.toml when present).
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Enqueue a review at startup: `provider:repo:number:mode`
    /// (e.g. `github:acme/api:42:diff`). Repeatable.
    #[arg(long = "enqueue")]
    enqueue: Vec<String>,

    /// Log filter override (also REVIEWD_LOG / RUST_LOG).
    #[arg(long, default_value = "info")]
    log: String,
}

/// A parsed `--enqueue` spec.
#[derive(Debug, PartialEq, Eq)]
struct EnqueueSpec {
    provider: ProviderKind,
    repository_id: String,
    number: u64,
    mode: ReviewMode,
}

/// Parse `provider:repo:number:mode`. The repository segment may itself
/// contain colons; provider is the first segment and number/mode the
/// last two.
fn parse_enqueue_spec(spec: &str) -> Result<EnqueueSpec, String> {
    let (rest, mode) = spec
        .rsplit_once(':')
        .ok_or_else(|| format!("malformed enqueue spec: {spec}"))?;
    let (rest, number) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("malformed enqueue spec: {spec}"))?;
    let (provider, repository_id) = rest
        .split_once(':')
        .ok_or_else(|| format!("malformed enqueue spec: {spec}"))?;

    Ok(EnqueueSpec {
        provider: provider.parse()?,
        repository_id: repository_id.to_string(),
        number: number
            .parse()
            .map_err(|_| format!("invalid change request number: {number}"))?,
        mode: mode.parse()?,
    })
}

fn build_scm_registry(config: &Config) -> anyhow::Result<ScmRegistry> {
    let github: Option<Arc<dyn ScmClient>> = if config.scm.github.token.is_empty() {
        None
    } else {
        let base = non_empty(&config.scm.github.base_url);
        Some(Arc::new(GitHubClient::new(base, &config.scm.github.token)?))
    };
    let gitlab: Option<Arc<dyn ScmClient>> = if config.scm.gitlab.token.is_empty() {
        None
    } else {
        let base = non_empty(&config.scm.gitlab.base_url);
        Some(Arc::new(GitLabClient::new(base, &config.scm.gitlab.token)?))
    };
    Ok(ScmRegistry::new(github, gitlab))
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    reviewd::telemetry::init(&args.log);

    let config = Config::load(args.config.as_deref(), &Env::real())
        .context("failed to load configuration")?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("GIT_SHA"),
        build_date = env!("BUILD_DATE"),
        "starting reviewd"
    );

    // Shared pipeline state.
    let diff_queue = Arc::new(WorkQueue::new(config.queue.high_water_mark));
    let agentic_queue = Arc::new(WorkQueue::new(config.queue.high_water_mark));
    let status = Arc::new(StatusChannel::default());
    let results = Arc::new(ResultStore::new(Duration::from_secs(config.result.ttl_secs)));

    let backend = OpenAiBackend::new(
        config.llm.provider.clone(),
        config.llm.base_url.clone(),
        config.llm.api_key.clone().unwrap_or_default(),
    )
    .context("failed to build LLM backend")?;
    let llm = Arc::new(LlmClient::new(
        Arc::new(backend),
        LlmClientConfig {
            timeout: Duration::from_secs(config.llm.timeout_secs),
            max_retries: config.llm.max_retries,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        },
        CircuitBreaker::new(BreakerConfig {
            failure_rate: config.llm.circuit_breaker.failure_rate,
            window: config.llm.circuit_breaker.window,
            cooldown: Duration::from_secs(config.llm.circuit_breaker.cooldown_secs),
            min_samples: 5,
        }),
    ));

    let composer = Arc::new(
        PromptComposer::new(
            config.prompt.language.clone(),
            config.prompt.focus.clone(),
            non_empty(&config.prompt.ticket_pattern),
            &config.prompt.redact_patterns,
        )
        .context("invalid prompt configuration")?
        .with_ticket_timeout(Duration::from_secs(config.prompt.ticket_timeout_secs)),
    );

    let cache = Arc::new(ReviewCache::new(
        config.cache.enabled,
        config.cache.max_entries,
        Duration::from_secs(config.cache.ttl_secs),
    ));

    let sandbox = Arc::new(SandboxExecutor::new(
        SandboxConfig {
            image: config.agent.sandbox.image.clone(),
            memory_bytes: config.agent.sandbox.memory_bytes,
            nano_cpus: config.agent.sandbox.nano_cpus,
            read_only: config.agent.sandbox.read_only,
            auto_remove: config.agent.sandbox.auto_remove,
            no_new_privileges: config.agent.sandbox.no_new_privileges,
            timeout: Duration::from_secs(
                config
                    .agent
                    .sandbox
                    .timeout_secs
                    .min(config.agent.analysis_timeout_secs),
            ),
            grace_period: Duration::from_secs(config.agent.sandbox.grace_period_secs),
            max_log_bytes: config.agent.sandbox.max_log_bytes,
        },
        Vec::new(),
    ));

    let scm = build_scm_registry(&config)?;

    let service = ReviewService::new(
        diff_queue.clone(),
        agentic_queue.clone(),
        status.clone(),
        results.clone(),
    );

    for spec in &args.enqueue {
        let spec = parse_enqueue_spec(spec).map_err(anyhow::Error::msg)?;
        let id = service.create_review(spec.provider, &spec.repository_id, spec.number, spec.mode)?;
        tracing::info!(request_id = %id, "seeded review request");
    }

    let ctx = Arc::new(WorkerContext {
        config,
        diff_queue,
        agentic_queue,
        status,
        results: results.clone(),
        scm,
        llm,
        composer,
        cache,
        sandbox,
        ticket: None,
    });

    // Expire result records past their TTL.
    let sweep_results = results.clone();
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = sweep_results.sweep();
            if removed > 0 {
                tracing::debug!(removed, "swept expired result records");
            }
        }
    });

    // Run the pools until ctrl-c.
    let cancel = CancellationToken::new();
    let pools = tokio::spawn(run_pools(ctx, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested; draining workers");
    cancel.cancel();
    sweeper.abort();
    let _ = pools.await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_spec_parses() {
        let spec = parse_enqueue_spec("github:acme/api:42:diff").unwrap();
        assert_eq!(spec.provider, ProviderKind::GitHub);
        assert_eq!(spec.repository_id, "acme/api");
        assert_eq!(spec.number, 42);
        assert_eq!(spec.mode, ReviewMode::Diff);
    }

    #[test]
    fn enqueue_spec_allows_colons_in_repo() {
        let spec = parse_enqueue_spec("gitlab:group/sub:repo:7:agentic").unwrap();
        assert_eq!(spec.provider, ProviderKind::GitLab);
        assert_eq!(spec.repository_id, "group/sub:repo");
        assert_eq!(spec.number, 7);
        assert_eq!(spec.mode, ReviewMode::Agentic);
    }

    #[test]
    fn malformed_enqueue_specs_fail() {
        assert!(parse_enqueue_spec("github:acme/api:42").is_err());
        assert!(parse_enqueue_spec("github:acme/api:notanumber:diff").is_err());
        assert!(parse_enqueue_spec("sourcehut:acme/api:1:diff").is_err());
        assert!(parse_enqueue_spec("github:acme/api:1:hybrid").is_err());
    }
}
