//! App-wide constants.
//!
//! Centralises the daemon name, config paths, and environment variable
//! names so a rename only requires changing this file.

/// Display name of the daemon (lowercase).
pub const APP_NAME: &str = "reviewd";

/// Local config filename (e.g. `reviewd.toml` next to the working directory).
pub const CONFIG_FILENAME: &str = "reviewd.toml";

/// Directory name under `~/.config/` for global config.
pub const CONFIG_DIR: &str = "reviewd";

/// Prefix used for per-task workspace directories under the system tmp dir.
pub const WORKSPACE_PREFIX: &str = "agent-";

/// Fixed path at which the task workspace is bind-mounted inside the
/// analysis container.
pub const SANDBOX_MOUNT_PATH: &str = "/workspace";

// ── Environment variable names ──────────────────────────────────────

pub const ENV_LLM_PROVIDER: &str = "REVIEWD_LLM_PROVIDER";
pub const ENV_LLM_MODEL: &str = "REVIEWD_LLM_MODEL";
pub const ENV_LLM_API_KEY: &str = "REVIEWD_LLM_API_KEY";
pub const ENV_LLM_BASE_URL: &str = "REVIEWD_LLM_BASE_URL";
pub const ENV_GITHUB_TOKEN: &str = "REVIEWD_GITHUB_TOKEN";
pub const ENV_GITLAB_TOKEN: &str = "REVIEWD_GITLAB_TOKEN";
pub const ENV_LOG_FILTER: &str = "REVIEWD_LOG";
