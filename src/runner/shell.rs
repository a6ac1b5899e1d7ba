//! Shell-backed command runner with line-by-line output streaming.

use std::io::Write;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::CommandRunner;
use crate::error::{PipelineError, Result};

/// Variables removed from every child environment.
///
/// `DEBUG` makes FreeSurfer tools write gigabytes of diagnostics.
pub const SUPPRESSED_ENV_VARS: &[&str] = &["DEBUG"];

/// Default shell used to interpret command strings.
const DEFAULT_SHELL: &str = "sh";

/// A shell command line plus its execution options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// The command string passed to `sh -c`.
    pub command: String,
    /// Environment overrides merged into the current process environment.
    pub env: Vec<(String, String)>,
    /// Return normally regardless of exit code.
    pub ignore_errors: bool,
}

impl ShellCommand {
    /// Creates a command that fails on nonzero exit.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
            ignore_errors: false,
        }
    }

    /// Adds an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Accepts any exit code.
    pub fn ignoring_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }
}

impl From<&str> for ShellCommand {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl From<String> for ShellCommand {
    fn from(command: String) -> Self {
        Self::new(command)
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit code; -1 when the process was terminated by a signal.
    pub exit_code: i32,
}

impl CommandOutcome {
    /// Checks if the command exited with code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands through `sh -c`, echoing combined stdout/stderr as it arrives.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    echo: bool,
}

impl ShellRunner {
    /// Creates a runner using `sh` that echoes tool output to stdout.
    pub fn new() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            echo: true,
        }
    }

    /// Uses a different shell binary (e.g. `bash`).
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Disables echoing of tool output.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    fn emit(&self, line: &str) {
        if !self.echo {
            return;
        }
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{}", line);
        let _ = handle.flush();
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutcome> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&command.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        for var in SUPPRESSED_ENV_VARS {
            cmd.env_remove(var);
        }

        debug!(command = %command.command, "Launching command");

        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr not captured"))?;

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_lines.next_line(), if stdout_open => {
                    match line {
                        Ok(Some(l)) => self.emit(&l),
                        Ok(None) => stdout_open = false,
                        Err(e) => {
                            warn!(error = %e, "Error reading command stdout");
                            stdout_open = false;
                        }
                    }
                }
                line = stderr_lines.next_line(), if stderr_open => {
                    match line {
                        Ok(Some(l)) => self.emit(&l),
                        Ok(None) => stderr_open = false,
                        Err(e) => {
                            warn!(error = %e, "Error reading command stderr");
                            stderr_open = false;
                        }
                    }
                }
            }
        }

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);

        info!(
            command = %command.command,
            exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );

        if exit_code != 0 && !command.ignore_errors {
            return Err(PipelineError::CommandFailed {
                command: command.command.clone(),
                code: exit_code,
            });
        }

        Ok(CommandOutcome { exit_code })
    }
}
