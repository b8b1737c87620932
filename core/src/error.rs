//! Error types for the procport-core library.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for procport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during process and port management.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid caller input (bad port, empty command, rejected argument).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The target process does not exist.
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// The process exists but the caller may not signal it.
    #[error("Access denied to process: {0}")]
    ProcessAccessDenied(String),

    /// Something is already bound to the port.
    #[error("Port {port} is not available")]
    PortNotAvailable { port: u16 },

    /// Port enumeration itself failed.
    #[error("Port scan failed: {0}")]
    PortScanFailed(String),

    /// Every port in the searched range is taken.
    #[error("No free port in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    /// An external tool exited unsuccessfully.
    #[error("Command `{command}` failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A system call or tool invocation failed for a reason that is not
    /// an exit status (spawn failure, unreadable output).
    #[error("System call failed: {0}")]
    SystemCallFailed(String),

    /// An operation exceeded its time budget.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// Permission denied for an operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Platform not supported.
    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    /// The circuit breaker for an operation is open.
    #[error("Circuit open for `{key}`, retry in {}ms", .retry_after.as_millis())]
    CircuitOpen { key: String, retry_after: Duration },

    /// Too many recoveries are already in flight.
    #[error("Recovery capacity exhausted ({active}/{limit} active)")]
    RecoveryOverloaded { active: usize, limit: usize },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error family used for retry policy and fallback selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Validation,
    Process,
    Port,
    System,
    Timeout,
    Permission,
    Platform,
}

impl ErrorCategory {
    /// All categories, in declaration order.
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::Validation,
        ErrorCategory::Process,
        ErrorCategory::Port,
        ErrorCategory::System,
        ErrorCategory::Timeout,
        ErrorCategory::Permission,
        ErrorCategory::Platform,
    ];
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Process => "process",
            ErrorCategory::Port => "port",
            ErrorCategory::System => "system",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Platform => "platform",
        };
        f.write_str(name)
    }
}

/// Process exit codes surfaced to command-line front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NotFound = 2,
    PermissionDenied = 3,
    PortUnavailable = 4,
    Timeout = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::ProcessNotFound(_) => "PROCESS_NOT_FOUND",
            Error::ProcessAccessDenied(_) => "PROCESS_ACCESS_DENIED",
            Error::PortNotAvailable { .. } => "PORT_NOT_AVAILABLE",
            Error::PortScanFailed(_) => "PORT_SCAN_FAILED",
            Error::NoFreePort { .. } => "NO_FREE_PORT",
            Error::CommandFailed { .. } | Error::SystemCallFailed(_) => "SYSTEM_CALL_FAILED",
            Error::Timeout { .. } => "TIMEOUT",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::UnsupportedPlatform(_) => "PLATFORM_UNSUPPORTED",
            Error::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Error::RecoveryOverloaded { .. } => "RECOVERY_OVERLOADED",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }

    /// The family this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) | Error::Config(_) | Error::Json(_) => ErrorCategory::Validation,
            Error::ProcessNotFound(_) | Error::ProcessAccessDenied(_) => ErrorCategory::Process,
            Error::PortNotAvailable { .. } | Error::PortScanFailed(_) | Error::NoFreePort { .. } => {
                ErrorCategory::Port
            }
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::PermissionDenied(_) => ErrorCategory::Permission,
            Error::UnsupportedPlatform(_) => ErrorCategory::Platform,
            Error::CommandFailed { .. }
            | Error::SystemCallFailed(_)
            | Error::CircuitOpen { .. }
            | Error::RecoveryOverloaded { .. }
            | Error::Io(_) => ErrorCategory::System,
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ProcessNotFound(_)
            | Error::PortNotAvailable { .. }
            | Error::PortScanFailed(_)
            | Error::NoFreePort { .. }
            | Error::Timeout { .. }
            | Error::CommandFailed { .. }
            | Error::SystemCallFailed(_)
            | Error::Io(_) => true,
            Error::Validation(_)
            | Error::ProcessAccessDenied(_)
            | Error::PermissionDenied(_)
            | Error::UnsupportedPlatform(_)
            | Error::CircuitOpen { .. }
            | Error::RecoveryOverloaded { .. }
            | Error::Config(_)
            | Error::Json(_) => false,
        }
    }

    /// Whether fallbacks and degraded results may stand in for this error.
    ///
    /// Input errors and unsupported platforms are never papered over.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::Platform
        )
    }

    /// Whether the error still carries raw tool or OS text that has not been
    /// mapped onto the taxonomy.
    pub fn is_unclassified(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::CommandFailed { .. } | Error::SystemCallFailed(_)
        )
    }

    /// Exit code a command-line front end should report.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::ProcessNotFound(_) => ExitCode::NotFound,
            Error::ProcessAccessDenied(_) | Error::PermissionDenied(_) => {
                ExitCode::PermissionDenied
            }
            Error::PortNotAvailable { .. } | Error::NoFreePort { .. } => ExitCode::PortUnavailable,
            Error::Timeout { .. } => ExitCode::Timeout,
            _ => ExitCode::GeneralError,
        }
    }

    /// Short message meant for an end user.
    pub fn user_message(&self) -> String {
        match self {
            Error::ProcessNotFound(_) => "The process no longer exists.".to_string(),
            Error::ProcessAccessDenied(_) | Error::PermissionDenied(_) => {
                "You do not have permission to do that.".to_string()
            }
            Error::PortNotAvailable { port } => format!("Port {} is already in use.", port),
            Error::NoFreePort { start, end } => {
                format!("Every port between {} and {} is in use.", start, end)
            }
            Error::Timeout { operation, .. } => format!("{} took too long.", operation),
            Error::UnsupportedPlatform(platform) => {
                format!("{} is not a supported platform.", platform)
            }
            other => other.to_string(),
        }
    }

    /// Machine-usable hints on how to get past this error.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Error::Validation(_) => vec!["Check the arguments and try again.".to_string()],
            Error::ProcessNotFound(_) => vec![
                "List running processes to confirm the PID.".to_string(),
                "The process may have exited already.".to_string(),
            ],
            Error::ProcessAccessDenied(_) | Error::PermissionDenied(_) => vec![
                "Re-run with elevated privileges.".to_string(),
                "Target only processes owned by the current user.".to_string(),
            ],
            Error::PortNotAvailable { port } => vec![
                format!("Free port {} by resolving the conflict.", port),
                "Pick a free port with a port search.".to_string(),
            ],
            Error::PortScanFailed(_) => vec![
                "Install ss, netstat, or lsof.".to_string(),
                "Retry the scan.".to_string(),
            ],
            Error::NoFreePort { .. } => vec!["Widen the port range.".to_string()],
            Error::CommandFailed { .. } | Error::SystemCallFailed(_) | Error::Io(_) => {
                vec!["Check that the required system tools are installed.".to_string()]
            }
            Error::Timeout { .. } => vec!["Increase the timeout and retry.".to_string()],
            Error::UnsupportedPlatform(_) => {
                vec!["Run on Linux, macOS, or Windows.".to_string()]
            }
            Error::CircuitOpen { retry_after, .. } => {
                vec![format!("Wait {}ms before retrying.", retry_after.as_millis())]
            }
            Error::RecoveryOverloaded { .. } => vec!["Retry once in-flight work drains.".to_string()],
            Error::Config(_) | Error::Json(_) => {
                vec!["Fix or delete the configuration file.".to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_categories() {
        let err = Error::NoFreePort { start: 3000, end: 3010 };
        assert_eq!(err.code(), "NO_FREE_PORT");
        assert_eq!(err.category(), ErrorCategory::Port);
        assert!(err.is_retryable());
        assert_eq!(err.exit_code(), ExitCode::PortUnavailable);

        let err = Error::ProcessAccessDenied("1".into());
        assert_eq!(err.category(), ErrorCategory::Process);
        assert!(!err.is_retryable());
        assert_eq!(i32::from(err.exit_code()), 3);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::ProcessNotFound("9".into()).exit_code(), ExitCode::NotFound);
        assert_eq!(
            Error::Timeout {
                operation: "ps".into(),
                after: Duration::from_secs(1)
            }
            .exit_code(),
            ExitCode::Timeout
        );
        assert_eq!(Error::Validation("x".into()).exit_code(), ExitCode::GeneralError);
    }

    #[test]
    fn test_recoverability() {
        assert!(!Error::Validation("bad".into()).is_recoverable());
        assert!(!Error::UnsupportedPlatform("plan9".into()).is_recoverable());
        assert!(Error::SystemCallFailed("spawn".into()).is_recoverable());
    }

    #[test]
    fn test_display_and_suggestions() {
        let err = Error::CommandFailed {
            command: "ss -tuln".into(),
            code: Some(1),
            stderr: "boom".into(),
        };
        assert!(err.to_string().contains("ss -tuln"));
        assert!(!err.suggestions().is_empty());
        assert!(err.is_unclassified());
    }
}
