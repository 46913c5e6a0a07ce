//! Config structs and loading logic.
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`REVIEWD_*`)
//! 2. `reviewd.toml` in the working directory (or `--config` path)
//! 3. `~/.config/reviewd/config.toml` (global defaults)
//! 4. Built-in defaults
//!
//! Files are deep-merged as TOML tables before deserialization, so a
//! local file only overrides the keys it actually sets.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::aggregate::TitleSimilarity;
use crate::env::Env;

/// Errors during config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub diff: DiffConfig,
    pub llm: LlmConfig,
    pub prompt: PromptConfig,
    pub agent: AgentConfig,
    pub queue: QueueSettings,
    pub result: ResultConfig,
    pub cache: CacheConfig,
    pub workers: WorkersConfig,
    pub scm: ScmConfig,
    pub publish: PublishConfig,
}

/// Diff handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Lines of surrounding context requested from the provider.
    pub context_lines: u32,
    /// LLM chunk cap in hunk-content lines.
    pub max_lines_per_chunk: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            context_lines: 5,
            max_lines_per_chunk: 1500,
        }
    }
}

/// LLM backend and client policy.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend label (`openai` or any OpenAI-compatible server).
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f64,
    pub max_retries: u32,
    pub circuit_breaker: CircuitBreakerSettings,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout_secs: 120,
            temperature: 0.0,
            max_retries: 3,
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Failure rate in `[0, 1]` that opens the breaker.
    pub failure_rate: f64,
    /// Rolling window size in call outcomes.
    pub window: usize,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            window: 20,
            cooldown_secs: 30,
        }
    }
}

/// Prompt composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Language hint in the repository metadata block.
    pub language: String,
    /// Review focus in the repository metadata block.
    pub focus: String,
    /// Regex extracting a ticket id from title/description; first
    /// capture group (or whole match) is the id. Empty disables.
    pub ticket_pattern: String,
    pub ticket_timeout_secs: u64,
    /// Extra redaction regexes applied to prompt content.
    pub redact_patterns: Vec<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            language: "general".to_string(),
            focus: "correctness, security, and maintainability".to_string(),
            ticket_pattern: String::new(),
            ticket_timeout_secs: 5,
            redact_patterns: Vec::new(),
        }
    }
}

/// Agentic mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Shallow-clone depth; at least 1.
    pub clone_depth: u32,
    pub tests_enabled: bool,
    pub analysis_timeout_secs: u64,
    pub aggregation: AggregationSettings,
    pub sandbox: SandboxSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            clone_depth: 1,
            tests_enabled: true,
            analysis_timeout_secs: 600,
            aggregation: AggregationSettings::default(),
            sandbox: SandboxSettings::default(),
        }
    }
}

/// Aggregation and prioritization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub deduplication_enabled: bool,
    pub similarity_threshold: f64,
    pub line_tolerance: u32,
    pub min_confidence: f64,
    pub max_issues_per_file: usize,
    pub similarity: TitleSimilarity,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            deduplication_enabled: true,
            similarity_threshold: 0.85,
            line_tolerance: 5,
            min_confidence: 0.7,
            max_issues_per_file: 10,
            similarity: TitleSimilarity::default(),
        }
    }
}

/// Sandbox constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub image: String,
    pub memory_bytes: u64,
    pub nano_cpus: u64,
    pub read_only: bool,
    pub auto_remove: bool,
    pub no_new_privileges: bool,
    pub timeout_secs: u64,
    pub grace_period_secs: u64,
    pub max_log_bytes: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "reviewd-analysis:latest".to_string(),
            memory_bytes: 2 * 1024 * 1024 * 1024,
            nano_cpus: 2_000_000_000,
            read_only: true,
            auto_remove: true,
            no_new_privileges: true,
            timeout_secs: 600,
            grace_period_secs: 10,
            max_log_bytes: 1024 * 1024,
        }
    }
}

/// Work queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub stream_key: String,
    pub consumer_group: String,
    pub consumer_id: String,
    pub batch_size: usize,
    pub claim_block_timeout_ms: u64,
    pub min_idle_reclaim_ms: u64,
    pub high_water_mark: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            stream_key: "reviewd:requests".to_string(),
            consumer_group: "reviewd".to_string(),
            consumer_id: "worker".to_string(),
            batch_size: 4,
            claim_block_timeout_ms: 5000,
            min_idle_reclaim_ms: 60_000,
            high_water_mark: 1000,
        }
    }
}

/// Result record retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultConfig {
    pub ttl_secs: u64,
}

impl Default for ResultConfig {
    fn default() -> Self {
        Self { ttl_secs: 86_400 }
    }
}

/// Review result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
            ttl_secs: 3600,
        }
    }
}

/// Worker pool sizes, per mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub diff_count: usize,
    pub agentic_count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            diff_count: 2,
            agentic_count: 1,
        }
    }
}

/// SCM provider endpoints and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScmConfig {
    pub github: ScmProviderConfig,
    pub gitlab: ScmProviderConfig,
}

impl ScmConfig {
    pub fn for_provider(&self, kind: crate::models::ProviderKind) -> &ScmProviderConfig {
        match kind {
            crate::models::ProviderKind::GitHub => &self.github,
            crate::models::ProviderKind::GitLab => &self.gitlab,
        }
    }
}

/// One provider's endpoints and token.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScmProviderConfig {
    /// API base URL; empty uses the provider default.
    pub base_url: String,
    /// Base URL for clone URLs.
    pub clone_base: String,
    pub token: String,
}

impl std::fmt::Debug for ScmProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScmProviderConfig")
            .field("base_url", &self.base_url)
            .field("clone_base", &self.clone_base)
            .field(
                "token",
                &if self.token.is_empty() {
                    "<unset>"
                } else {
                    "[REDACTED]"
                },
            )
            .finish()
    }
}

impl Default for ScmProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            clone_base: String::new(),
            token: String::new(),
        }
    }
}

/// Publication behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Render `suggested_fix` blocks in inline comments.
    pub include_suggested_fix: bool,
    /// On task failure, still post a best-effort summary when findings
    /// exist.
    pub partial_on_failure: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            include_suggested_fix: false,
            partial_on_failure: false,
        }
    }
}

impl Config {
    /// Load configuration with proper layering.
    ///
    /// `local_path` overrides the default `reviewd.toml` lookup in the
    /// working directory.
    pub fn load(local_path: Option<&Path>, env: &Env) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                merge_table(&mut merged, Self::load_table(&global_path)?);
            }
        }

        let local = match local_path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(crate::constants::CONFIG_FILENAME),
        };
        if local.exists() {
            merge_table(&mut merged, Self::load_table(&local)?);
        } else if local_path.is_some() {
            return Err(ConfigError::ReadFile {
                path: local,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let mut config: Config =
            toml::Value::Table(merged)
                .try_into()
                .map_err(|source| ConfigError::ParseFile {
                    path: local,
                    source,
                })?;

        config.apply_env_vars(env);
        config.fill_provider_defaults();
        config.validate()?;
        Ok(config)
    }

    /// `~/.config/reviewd/config.toml`.
    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(crate::constants::CONFIG_DIR).join("config.toml"))
    }

    fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Layer 1: environment variables.
    fn apply_env_vars(&mut self, env: &Env) {
        use crate::constants::*;

        if let Ok(provider) = env.var(ENV_LLM_PROVIDER) {
            self.llm.provider = provider;
        }
        if let Ok(model) = env.var(ENV_LLM_MODEL) {
            self.llm.model = model;
        }
        if let Ok(key) = env.var(ENV_LLM_API_KEY) {
            self.llm.api_key = Some(key);
        }
        if let Ok(url) = env.var(ENV_LLM_BASE_URL) {
            self.llm.base_url = url;
        }
        if let Ok(token) = env.var(ENV_GITHUB_TOKEN) {
            self.scm.github.token = token;
        }
        if let Ok(token) = env.var(ENV_GITLAB_TOKEN) {
            self.scm.gitlab.token = token;
        }
    }

    /// Fill provider URLs that are commonly left unset.
    fn fill_provider_defaults(&mut self) {
        if self.scm.github.clone_base.is_empty() {
            self.scm.github.clone_base = "https://github.com".to_string();
        }
        if self.scm.gitlab.clone_base.is_empty() {
            self.scm.gitlab.clone_base = "https://gitlab.com".to_string();
        }
    }

    /// Reject configurations that cannot work.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.agent.aggregation.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "agent.aggregation.similarity_threshold must be in [0, 1], got {}",
                self.agent.aggregation.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.agent.aggregation.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "agent.aggregation.min_confidence must be in [0, 1], got {}",
                self.agent.aggregation.min_confidence
            )));
        }
        if self.agent.clone_depth == 0 {
            return Err(ConfigError::Invalid(
                "agent.clone_depth must be at least 1".to_string(),
            ));
        }
        if self.queue.high_water_mark == 0 {
            return Err(ConfigError::Invalid(
                "queue.high_water_mark must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Recursively merge `overlay` into `base`, table by table.
fn merge_table(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_child)), toml::Value::Table(overlay_child)) => {
                merge_table(base_child, overlay_child);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
