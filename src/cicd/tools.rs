// SPDX-License-Identifier: MIT

//! External command invocation behind a trait, so validator/fixer/release
//! nodes can run real subprocesses in production and mocks in tests.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// The most useful diagnostic text: stderr when present, stdout otherwise.
    pub fn detail(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// The tool is missing or not executable. Validators record this as a
    /// finding instead of failing the node.
    #[error("'{tool}' is not available: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("'{tool}' timed out after {seconds}s")]
    TimedOut { tool: String, seconds: u64 },

    #[error("failed to run '{tool}': {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CommandError::Unavailable { .. })
    }
}

/// Runs external commands. Production uses [`ProcessRunner`]; tests provide
/// scripted implementations.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, CommandError>;
}

/// Subprocess-backed runner with a per-command timeout. A wedged tool fails
/// its own command; the engine round is unaffected beyond waiting it out.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, CommandError> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        log::debug!("running {} {:?} (cwd: {:?})", program, args, cwd);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                return Err(CommandError::TimedOut {
                    tool: program.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
            Ok(Err(e))
                if e.kind() == std::io::ErrorKind::NotFound
                    || e.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                return Err(CommandError::Unavailable {
                    tool: program.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(CommandError::Io {
                    tool: program.to_string(),
                    source: e,
                })
            }
            Ok(Ok(output)) => output,
        };

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
