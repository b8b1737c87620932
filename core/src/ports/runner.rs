//! Command runner port (interface).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Default time a command may run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// How to run one command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOptions {
    pub timeout: Duration,
    /// Run the joined command line through the platform shell.
    pub shell: bool,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            shell: false,
            cwd: None,
            env: Vec::new(),
        }
    }
}

impl ExecuteOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn shell(mut self) -> Self {
        self.shell = true;
        self
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Captured outcome of a finished (or terminated) command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub timed_out: bool,
    /// Terminating signal number on Unix.
    pub signal: Option<i32>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Port for running external commands.
///
/// Platform adapters talk to the OS exclusively through this trait so their
/// parsing and fallback logic can be driven by scripted output.
pub trait CommandRunner: Send + Sync {
    /// Run `command` (argv form) and capture its output.
    ///
    /// Non-shell invocations fail with `Error::CommandFailed` on a non-zero
    /// exit; shell invocations report the exit code in the result.
    fn execute(
        &self,
        command: &[&str],
        options: &ExecuteOptions,
    ) -> impl std::future::Future<Output = Result<ExecutionResult>> + Send;
}
