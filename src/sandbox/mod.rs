//! Sandboxed subprocess execution for repository analysis.
//!
//! Runs the configured analysis image via `docker run` with the task
//! workspace bind-mounted at a fixed path. The command vector is
//! assembled from a fixed template plus configuration — never from LLM
//! output. Output streams are captured concurrently with a per-stream
//! byte bound; on wall-clock timeout the container gets a graceful stop
//! followed by a forced kill.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::constants::SANDBOX_MOUNT_PATH;
use crate::models::request::unix_millis;

/// Errors from sandbox execution.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to spawn sandbox: {0}")]
    Spawn(String),

    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sandbox cancelled")]
    Cancelled,
}

/// Sandbox constraints, enforced at spawn.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Analysis image to run.
    pub image: String,
    /// Memory cap in bytes.
    pub memory_bytes: u64,
    /// CPU share in nano-CPUs (1e9 = one core).
    pub nano_cpus: u64,
    /// Mount the container root filesystem read-only.
    pub read_only: bool,
    /// Remove the container on exit.
    pub auto_remove: bool,
    /// Disable privilege escalation.
    pub no_new_privileges: bool,
    /// Wall-clock timeout for the whole run.
    pub timeout: Duration,
    /// Grace period between stop and kill.
    pub grace_period: Duration,
    /// Per-stream capture bound.
    pub max_log_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "reviewd-analysis:latest".to_string(),
            memory_bytes: 2 * 1024 * 1024 * 1024,
            nano_cpus: 2_000_000_000,
            read_only: true,
            auto_remove: true,
            no_new_privileges: true,
            timeout: Duration::from_secs(600),
            grace_period: Duration::from_secs(10),
            max_log_bytes: 1024 * 1024,
        }
    }
}

/// Result of one sandboxed run.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    /// Process exit code; `-1` when unavailable (killed).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Unix millis.
    pub started_at: u64,
    pub ended_at: u64,
    /// Whether the wall-clock timeout fired.
    pub timed_out: bool,
}

impl SandboxOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Executes analysis commands inside the configured container.
pub struct SandboxExecutor {
    config: SandboxConfig,
    /// Extra environment passed into the container.
    env: Vec<(String, String)>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig, env: Vec<(String, String)>) -> Self {
        Self { config, env }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Assemble the full `docker run` argument vector.
    ///
    /// Fixed template: constraints from config, the workspace mount, the
    /// image, then the analysis command.
    pub fn command_args(&self, name: &str, workspace: &Path, command: &[String]) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--memory".to_string(),
            self.config.memory_bytes.to_string(),
            "--cpus".to_string(),
            format!("{:.2}", self.config.nano_cpus as f64 / 1e9),
        ];
        if self.config.read_only {
            args.push("--read-only".to_string());
        }
        if self.config.no_new_privileges {
            args.push("--security-opt".to_string());
            args.push("no-new-privileges".to_string());
        }
        if self.config.auto_remove {
            args.push("--rm".to_string());
        }
        args.push("-v".to_string());
        args.push(format!("{}:{}", workspace.display(), SANDBOX_MOUNT_PATH));
        args.push("-w".to_string());
        args.push(SANDBOX_MOUNT_PATH.to_string());
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.config.image.clone());
        args.extend(command.iter().cloned());
        args
    }

    /// Run `command` in the sandbox over `workspace`.
    pub async fn run(
        &self,
        name: &str,
        workspace: &Path,
        command: &[String],
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, SandboxError> {
        let args = self.command_args(name, workspace, command);
        tracing::debug!(container = name, ?args, "spawning sandbox");

        let outcome = run_process(
            "docker",
            &args,
            self.config.timeout,
            self.config.max_log_bytes,
            cancel,
        )
        .await?;

        if outcome.timed_out {
            self.terminate_container(name).await;
        }
        Ok(outcome)
    }

    /// Graceful stop, then forced kill after the grace period.
    async fn terminate_container(&self, name: &str) {
        let grace = self.config.grace_period.as_secs().to_string();
        let stop = tokio::process::Command::new("docker")
            .args(["stop", "-t", &grace, name])
            .output()
            .await;
        if let Err(e) = stop {
            tracing::warn!(container = name, error = %e, "docker stop failed");
        }
        let kill = tokio::process::Command::new("docker")
            .args(["kill", name])
            .output()
            .await;
        if let Err(e) = kill {
            tracing::debug!(container = name, error = %e, "docker kill failed (container likely gone)");
        }
    }
}

/// Spawn a process, stream-capture both pipes with a byte bound, and
/// enforce the wall-clock timeout.
async fn run_process(
    program: &str,
    args: &[String],
    timeout: Duration,
    max_log_bytes: usize,
    cancel: &CancellationToken,
) -> Result<SandboxOutcome, SandboxError> {
    let started_at = unix_millis();

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SandboxError::Spawn(format!("{program}: {e}")))?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(read_bounded(stdout_pipe, max_log_bytes));
    let stderr_task = tokio::spawn(read_bounded(stderr_pipe, max_log_bytes));

    // Wait first; only touch the child again once the borrow held by
    // the wait future is gone.
    let wait_result = tokio::select! {
        _ = cancel.cancelled() => None,
        status = tokio::time::timeout(timeout, child.wait()) => Some(status),
    };

    let mut timed_out = false;
    let exit_code = match wait_result {
        None => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(SandboxError::Cancelled);
        }
        Some(Ok(Ok(status))) => status.code().unwrap_or(-1),
        Some(Ok(Err(e))) => return Err(SandboxError::Io(e)),
        Some(Err(_)) => {
            timed_out = true;
            let _ = child.start_kill();
            let _ = child.wait().await;
            -1
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(SandboxOutcome {
        exit_code,
        stdout,
        stderr,
        started_at,
        ended_at: unix_millis(),
        timed_out,
    })
}

/// Drain a pipe fully, retaining at most `max_bytes`.
async fn read_bounded<R>(pipe: Option<R>, max_bytes: usize) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut retained: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = max_bytes.saturating_sub(retained.len());
                if room >= n {
                    retained.extend_from_slice(&buf[..n]);
                } else {
                    retained.extend_from_slice(&buf[..room]);
                    truncated = true;
                    // Keep draining so the child never blocks on a full
                    // pipe, but discard the excess.
                }
            }
            Err(_) => break,
        }
    }

    let mut text = String::from_utf8_lossy(&retained).into_owned();
    if truncated {
        text.push_str("\n... [output truncated]");
    }
    text
}
