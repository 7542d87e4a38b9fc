//! Remote execution capability: runs a command line and captures its output.

use async_trait::async_trait;
use tokio::process::Command;

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Why a command did not succeed.
///
/// Each variant carries only what the failing side actually produced;
/// [`crate::error_parser::error_output`] picks the text to show from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecFailure {
    /// The process ran and exited unsuccessfully.
    Exited {
        stdout: String,
        stderr: String,
        message: Option<String>,
    },
    /// The process could not be started, or failed without producing output.
    Message(String),
    /// Nothing is known about the failure.
    Unknown,
}

impl ExecFailure {
    /// A failure with output only, as produced by a runner that exits non-zero.
    pub fn output(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Exited {
            stdout: stdout.into(),
            stderr: stderr.into(),
            message: None,
        }
    }
}

/// Executes command lines. Substituted by scripted executors in tests.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> Result<ExecOutput, ExecFailure>;
}

/// Runs commands through `sh -c`, the way a shell-based `exec` would.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self { shell: "sh".into() }
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different POSIX shell binary.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> Result<ExecOutput, ExecFailure> {
        tracing::debug!(shell = %self.shell, command, "executing command");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecFailure::Message(format!("failed to execute {}: {e}", self.shell)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(code = ?output.status.code(), "command exited unsuccessfully");
            return Err(ExecFailure::Exited {
                stdout,
                stderr,
                message: Some(format!("Command failed: {command}")),
            });
        }

        Ok(ExecOutput { stdout, stderr })
    }
}

/// Scripted executor for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Returns pre-configured results in order and records every command.
    ///
    /// Once the script is exhausted, every further command succeeds with empty output.
    #[derive(Debug, Default)]
    pub struct ScriptedExecutor {
        results: Mutex<Vec<Result<ExecOutput, ExecFailure>>>,
        commands: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        pub fn new(results: Vec<Result<ExecOutput, ExecFailure>>) -> Self {
            // Reverse so we can pop from the end
            let mut results = results;
            results.reverse();
            Self {
                results: Mutex::new(results),
                commands: Mutex::new(Vec::new()),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(Vec::new())
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn execute(&self, command: &str) -> Result<ExecOutput, ExecFailure> {
            if let Ok(mut commands) = self.commands.lock() {
                commands.push(command.to_string());
            }
            self.results
                .lock()
                .ok()
                .and_then(|mut r| r.pop())
                .unwrap_or_else(|| Ok(ExecOutput::default()))
        }
    }
}
