//! Step execution.
//!
//! Runs a single step's command through the host shell and captures its
//! output. A non-zero exit is a normal outcome reported through
//! [`StepOutput::success`]; only a failure to run the command at all is an
//! error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command as ProcessCommand;

use super::error::StepError;
use super::record::Job;
use super::schema::Step;

/// Prefix of the environment variables exported to step commands.
pub const ENV_PREFIX: &str = "REPOFLOW_";

/// Per-job settings a step runs with.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    /// Environment variables exported to the command
    pub env: HashMap<String, String>,
    /// Working directory, inherited from the engine when unset
    pub working_dir: Option<PathBuf>,
    /// Time budget, unlimited when unset
    pub timeout: Option<Duration>,
}

impl StepContext {
    /// Build the context for a step of `job`.
    ///
    /// Exports the job ID, workflow and event, plus every scalar payload
    /// value as `REPOFLOW_PAYLOAD_<KEY>`. The step's own `env` wins over
    /// generated variables, and its `timeout` over `default_timeout`.
    pub fn for_step(
        job: &Job,
        step: &Step,
        working_dir: Option<PathBuf>,
        default_timeout: Option<Duration>,
    ) -> Self {
        let mut env = HashMap::new();
        env.insert(format!("{}JOB_ID", ENV_PREFIX), job.id.to_string());
        env.insert(format!("{}WORKFLOW", ENV_PREFIX), job.workflow.name.clone());
        env.insert(format!("{}EVENT", ENV_PREFIX), job.event.clone());

        for (key, value) in &job.payload {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            env.insert(format!("{}PAYLOAD_{}", ENV_PREFIX, env_key(key)), value);
        }

        if let Some(ref step_env) = step.env {
            env.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let timeout = step.timeout.map(Duration::from_secs).or(default_timeout);

        Self { env, working_dir, timeout }
    }
}

/// Normalize a payload key into an environment variable suffix.
fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Output of a step that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    /// Whether the command exited with status 0
    pub success: bool,
    /// Exit code (`None` if killed by a signal)
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Time taken
    pub duration: Duration,
}

/// Runs one step.
///
/// Implementations are shared by every worker, so they must be stateless or
/// internally synchronized.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute `step` and report its outcome.
    async fn run(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError>;
}

/// Executes steps with the host shell.
#[derive(Debug, Clone)]
pub struct ShellStepExecutor {
    shell: String,
    shell_arg: String,
}

impl Default for ShellStepExecutor {
    fn default() -> Self {
        let (shell, shell_arg) = default_shell();
        Self { shell: shell.to_string(), shell_arg: shell_arg.to_string() }
    }
}

impl ShellStepExecutor {
    /// Create an executor using the platform shell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific interpreter, e.g. `("bash", "-c")`.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>, arg: impl Into<String>) -> Self {
        self.shell = shell.into();
        self.shell_arg = arg.into();
        self
    }
}

#[async_trait]
impl StepExecutor for ShellStepExecutor {
    async fn run(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let start = Instant::now();

        let mut cmd = ProcessCommand::new(&self.shell);
        cmd.arg(&self.shell_arg).arg(&step.command);

        if let Some(ref dir) = ctx.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&ctx.env);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the child on timeout must take the process down with it
        cmd.kill_on_drop(true);
        // Own process group, so a timeout also reaches whatever the command started
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|source| StepError::Spawn { shell: self.shell.clone(), source })?;
        let pid = child.id();

        let output = match ctx.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    // The shell itself is killed and reaped when the child is dropped
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    tracing::warn!(step = step.name, timeout = ?limit, "Step timed out, killed");
                    return Err(StepError::Timeout(limit));
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(StepOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}

/// Kill every process left in the step's process group.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else { return };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "Failed to kill step process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Get the shell and argument for the current platform.
fn default_shell() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}
