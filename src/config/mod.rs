//! Configuration loading and layering.
//!
//! Handles `reviewd.toml` loading, environment variable resolution,
//! and default merging with proper priority ordering.

pub mod loader;

pub use loader::{
    AgentConfig, AggregationSettings, CacheConfig, Config, ConfigError, DiffConfig, LlmConfig,
    PromptConfig, PublishConfig, QueueSettings, ResultConfig, SandboxSettings, ScmConfig,
    ScmProviderConfig, WorkersConfig,
};
