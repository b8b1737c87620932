//! Validated, timeout-bounded subprocess execution.
//!
//! Every external tool the adapters use goes through [`CommandExecutor`]:
//! arguments are sanitized, checked against dangerous patterns and a
//! per-OS allow-list, and the process is terminated (then killed) when it
//! overruns its timeout.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::ports::{CommandRunner, ExecuteOptions, ExecutionResult, HostPlatform};

/// Executables Unix adapters may invoke.
const UNIX_ALLOWED: &[&str] = &[
    "ps", "kill", "lsof", "ss", "netstat", "top", "uptime", "vm_stat", "sysctl",
];

/// Executables the Windows adapter may invoke.
const WINDOWS_ALLOWED: &[&str] = &["tasklist", "taskkill", "netstat", "wmic"];

/// Characters that would let an argument escape into a shell.
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '<', '>'];

/// Words that would raise privileges if they reached a shell.
const PRIVILEGE_ESCALATION: &[&str] = &["sudo", "su", "doas", "pkexec", "runas"];

/// How long output readers may keep draining after the process exited.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Runs external commands with validation, timeouts and retries.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecutorConfig,
    platform: HostPlatform,
}

impl CommandExecutor {
    /// Executor for the host OS family.
    ///
    /// Unsupported hosts get the Unix allow-list.
    pub fn new(config: ExecutorConfig) -> Self {
        let platform = HostPlatform::current().unwrap_or(HostPlatform::Linux);
        Self::for_platform(config, platform)
    }

    /// Executor enforcing the allow-list of `platform`.
    pub fn for_platform(config: ExecutorConfig, platform: HostPlatform) -> Self {
        Self { config, platform }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Default options derived from the configured timeout.
    pub fn default_options(&self) -> ExecuteOptions {
        ExecuteOptions::with_timeout(self.config.timeout())
    }

    fn allowed_executables(&self) -> &'static [&'static str] {
        if self.platform.is_unix() {
            UNIX_ALLOWED
        } else {
            WINDOWS_ALLOWED
        }
    }

    /// Strip control characters, trim, and cap the length of one argument.
    pub fn sanitize_argument(&self, arg: &str) -> String {
        let cleaned: String = arg.chars().filter(|c| !c.is_control()).collect();
        cleaned
            .trim()
            .chars()
            .take(self.config.max_arg_length)
            .collect()
    }

    /// Sanitize and validate an argv for direct (non-shell) execution.
    pub fn validate(&self, command: &[&str]) -> Result<Vec<String>> {
        if command.is_empty() {
            return Err(Error::Validation("Command must not be empty".to_string()));
        }

        let argv: Vec<String> = command.iter().map(|a| self.sanitize_argument(a)).collect();
        if argv[0].is_empty() {
            return Err(Error::Validation("Command must not be empty".to_string()));
        }

        for arg in &argv {
            if let Some(c) = arg.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
                return Err(Error::Validation(format!(
                    "Argument '{}' contains forbidden character '{}'",
                    arg, c
                )));
            }
            if is_path_traversal(arg) {
                return Err(Error::Validation(format!(
                    "Argument '{}' contains a path traversal",
                    arg
                )));
            }
            check_privilege_escalation(arg)?;
        }

        let executable = executable_name(&argv[0]);
        if !self.allowed_executables().contains(&executable.as_str()) {
            return Err(Error::Validation(format!(
                "Executable '{}' is not allowed on {}",
                executable, self.platform
            )));
        }

        Ok(argv)
    }

    /// Sanitize and validate a caller-supplied shell command line.
    ///
    /// The line is the caller's own, so metacharacters and the allow-list do
    /// not apply; privilege escalation is still refused.
    pub fn validate_shell(&self, command_line: &str) -> Result<String> {
        let line = self.sanitize_argument(command_line);
        if line.is_empty() {
            return Err(Error::Validation("Command must not be empty".to_string()));
        }
        check_privilege_escalation(&line)?;
        Ok(line)
    }

    /// Run a command and capture its output.
    pub async fn run(&self, command: &[&str], options: &ExecuteOptions) -> Result<ExecutionResult> {
        if options.shell {
            let line = self.validate_shell(&command.join(" "))?;
            let (program, flag) = if self.platform.is_unix() {
                ("sh", "-c")
            } else {
                ("cmd", "/C")
            };
            let args = vec![flag.to_string(), line.clone()];
            return self.spawn_and_wait(program, &args, &line, options).await;
        }

        let argv = self.validate(command)?;
        let shown = argv.join(" ");
        let result = self
            .spawn_and_wait(&argv[0], &argv[1..], &shown, options)
            .await?;

        if result.exit_code != Some(0) {
            return Err(Error::CommandFailed {
                command: shown,
                code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }

    /// Run a caller-supplied command line through the platform shell.
    pub async fn execute_shell(&self, command_line: &str, limit: Duration) -> Result<ExecutionResult> {
        self.run(&[command_line], &ExecuteOptions::with_timeout(limit).shell())
            .await
    }

    /// Run with a fixed number of attempts and exponential backoff.
    ///
    /// Validation failures are returned immediately.
    pub async fn run_with_retry(
        &self,
        command: &[&str],
        options: &ExecuteOptions,
        attempts: u32,
        base_delay: Duration,
    ) -> Result<ExecutionResult> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run(command, options).await {
                Ok(result) => return Ok(result),
                Err(e @ Error::Validation(_)) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
                    debug!(
                        command = %command.join(" "),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Command failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Retry using the configured attempt count and base delay.
    pub async fn run_with_default_retry(
        &self,
        command: &[&str],
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult> {
        self.run_with_retry(
            command,
            options,
            self.config.retry_attempts,
            Duration::from_millis(self.config.retry_base_delay_ms),
        )
        .await
    }

    async fn spawn_and_wait(
        &self,
        program: &str,
        args: &[String],
        shown: &str,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult> {
        debug!(command = %shown, shell = options.shell, "Executing command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| spawn_error(shown, e))?;

        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let (status, timed_out) = match timeout(options.timeout, child.wait()).await {
            Ok(status) => (status?, false),
            Err(_) => {
                warn!(
                    command = %shown,
                    timeout_ms = options.timeout.as_millis() as u64,
                    "Command timed out, terminating"
                );
                (self.terminate(&mut child).await?, true)
            }
        };

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;
        let duration = started.elapsed();

        if timed_out {
            return Err(Error::Timeout {
                operation: shown.to_string(),
                after: options.timeout,
            });
        }

        let result = ExecutionResult {
            stdout,
            stderr,
            exit_code: status.code(),
            duration,
            timed_out,
            signal: exit_signal(&status),
        };

        debug!(
            command = %shown,
            exit_code = ?result.exit_code,
            duration_ms = duration.as_millis() as u64,
            "Command finished"
        );
        Ok(result)
    }

    /// Ask the child to stop, then force it after the grace period.
    async fn terminate(&self, child: &mut Child) -> Result<ExitStatus> {
        send_terminate(child);

        match timeout(self.config.kill_grace(), child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(pid = ?child.id(), "Process ignored terminate request, killing");
                child.start_kill()?;
                Ok(child.wait().await?)
            }
        }
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl CommandRunner for CommandExecutor {
    async fn execute(&self, command: &[&str], options: &ExecuteOptions) -> Result<ExecutionResult> {
        self.run(command, options).await
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid = pid, error = %e, "SIGTERM delivery failed");
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    // No graceful signal for console processes; the grace wait still applies.
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "Failed to read command output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Collect a reader task, abandoning it if a grandchild keeps the pipe open.
async fn drain(mut task: JoinHandle<String>) -> String {
    match timeout(PIPE_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

fn spawn_error(command: &str, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::SystemCallFailed(format!("{}: command not found", command))
        }
        std::io::ErrorKind::PermissionDenied => {
            Error::PermissionDenied(format!("Cannot execute {}: {}", command, e))
        }
        _ => Error::Io(e),
    }
}

/// Lowercased basename without a `.exe` suffix.
fn executable_name(program: &str) -> String {
    let base = program.rsplit(['/', '\\']).next().unwrap_or(program);
    let lower = base.to_lowercase();
    lower.strip_suffix(".exe").unwrap_or(&lower).to_string()
}

fn is_path_traversal(arg: &str) -> bool {
    arg == ".." || arg.contains("../") || arg.contains("..\\")
}

fn check_privilege_escalation(text: &str) -> Result<()> {
    for word in text.split_whitespace() {
        let name = executable_name(word);
        if PRIVILEGE_ESCALATION.contains(&name.as_str()) {
            return Err(Error::Validation(format!(
                "Privilege escalation via '{}' is not allowed",
                word
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unix_executor() -> CommandExecutor {
        CommandExecutor::for_platform(ExecutorConfig::default(), HostPlatform::Linux)
    }

    #[test]
    fn test_validate_accepts_allowed_tools() {
        let exec = unix_executor();
        let argv = exec.validate(&["ps", "-eo", "pid,ppid"]).unwrap();
        assert_eq!(argv, vec!["ps", "-eo", "pid,ppid"]);
        assert!(exec.validate(&["/usr/sbin/lsof", "-iTCP:3000", "-sTCP:LISTEN"]).is_ok());
    }

    #[test]
    fn test_validate_rejects_dangerous_input() {
        let exec = unix_executor();
        assert!(exec.validate(&[]).is_err());
        assert!(exec.validate(&["   "]).is_err());
        assert!(exec.validate(&["ps", "aux; rm -rf /"]).is_err());
        assert!(exec.validate(&["ps", "$(whoami)"]).is_err());
        assert!(exec.validate(&["ps", "aux", "|", "grep"]).is_err());
        assert!(exec.validate(&["lsof", "../../etc/passwd"]).is_err());
        assert!(exec.validate(&["kill", "sudo"]).is_err());
        assert!(exec.validate(&["curl", "example.com"]).is_err());
    }

    #[test]
    fn test_allow_list_is_per_family() {
        let windows = CommandExecutor::for_platform(ExecutorConfig::default(), HostPlatform::Windows);
        assert!(windows.validate(&["taskkill", "/PID", "42", "/F"]).is_ok());
        assert!(windows.validate(&["TASKLIST.EXE", "/FO", "CSV"]).is_ok());
        assert!(windows.validate(&["ps", "aux"]).is_err());
        assert!(unix_executor().validate(&["wmic", "process"]).is_err());
    }

    #[test]
    fn test_sanitize_strips_control_and_caps_length() {
        let exec = unix_executor();
        assert_eq!(exec.sanitize_argument("  -eo\u{0007}\n "), "-eo");
        let long = "a".repeat(5_000);
        assert_eq!(exec.sanitize_argument(&long).chars().count(), 1_000);
    }

    #[test]
    fn test_validate_shell() {
        let exec = unix_executor();
        assert_eq!(exec.validate_shell(" echo ok && ls ").unwrap(), "echo ok && ls");
        assert!(exec.validate_shell("sudo rm -rf /").is_err());
        assert!(exec.validate_shell("").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_shell_captures_output() {
        let exec = unix_executor();
        let result = exec
            .execute_shell("echo ok; echo err 1>&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "ok");
        assert_eq!(result.stderr.trim(), "err");
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_shell_times_out() {
        let config = ExecutorConfig {
            kill_grace_ms: 200,
            ..ExecutorConfig::default()
        };
        let exec = CommandExecutor::for_platform(config, HostPlatform::Linux);
        let started = Instant::now();
        let err = exec
            .execute_shell("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_nonzero_exit_fails() {
        let exec = unix_executor();
        // kill -0 on a PID that cannot exist
        let err = exec
            .run(&["kill", "-0", "2147483646"], &ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_retry_stops_on_validation() {
        let exec = unix_executor();
        let started = Instant::now();
        let err = exec
            .run_with_retry(&["rm", "-rf"], &ExecuteOptions::default(), 5, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
