//! Network connection and port domain models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::process::ProcessRecord;
use crate::error::{Error, Result};

// ============================================================================
// Protocol
// ============================================================================

/// Transport protocol of a socket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Tcp, Protocol::Udp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Parse a tool's protocol column ("TCP", "tcp6", "udp4", ...).
    pub fn parse(token: &str) -> Option<Self> {
        let lower = token.trim().to_lowercase();
        let base = lower.trim_end_matches(|c: char| c.is_ascii_digit());
        match base {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Protocol::parse(s)
            .ok_or_else(|| Error::Validation(format!("Unknown protocol '{}', expected tcp or udp", s)))
    }
}

// ============================================================================
// NetworkConnection
// ============================================================================

/// One socket as reported by ss, netstat, or lsof.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConnection {
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: Option<String>,
    pub remote_port: Option<u16>,
    pub protocol: Protocol,
    /// Normalized state (LISTEN, ESTABLISHED, ...).
    pub state: String,
    pub pid: Option<u32>,
    /// Owner name when the tool reports it inline.
    pub process_name: Option<String>,
}

impl NetworkConnection {
    /// A listening socket with no peer.
    pub fn listening(
        protocol: Protocol,
        local_address: impl Into<String>,
        local_port: u16,
        pid: Option<u32>,
    ) -> Self {
        Self {
            local_address: local_address.into(),
            local_port,
            remote_address: None,
            remote_port: None,
            protocol,
            state: "LISTEN".to_string(),
            pid,
            process_name: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.state == "LISTEN"
    }
}

// ============================================================================
// PortRecord
// ============================================================================

/// Canonical view of one (port, protocol) pair and its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    /// Unique identifier for this record instance.
    pub id: Uuid,
    pub port: u16,
    pub protocol: Protocol,
    pub state: String,
    pub process: Option<ProcessRecord>,
    pub local_address: String,
    pub remote_address: Option<String>,
}

impl PortRecord {
    /// Build a record from a connection and its resolved owner.
    pub fn from_connection(connection: &NetworkConnection, process: Option<ProcessRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            port: connection.local_port,
            protocol: connection.protocol,
            state: connection.state.clone(),
            process,
            local_address: connection.local_address.clone(),
            remote_address: connection.remote_address.clone(),
        }
    }

    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    /// Get the formatted port number for display (e.g., ":3000/tcp").
    pub fn display_port(&self) -> String {
        format!(":{}/{}", self.port, self.protocol)
    }
}

impl std::fmt::Display for PortRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.process {
            Some(p) => write!(
                f,
                "{}:{}/{} {} (PID: {}, Process: {})",
                self.local_address, self.port, self.protocol, self.state, p.pid, p.name
            ),
            None => write!(
                f,
                "{}:{}/{} {}",
                self.local_address, self.port, self.protocol, self.state
            ),
        }
    }
}

// ============================================================================
// ResolveOutcome
// ============================================================================

/// Result of a kill → verify → execute conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOutcome {
    pub id: Uuid,
    pub port: u16,
    /// True only when kill, verify and execute all completed.
    pub success: bool,
    pub killed_processes: Vec<ProcessRecord>,
    pub command: String,
    pub command_executed: bool,
    pub command_output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ResolveOutcome {
    pub(crate) fn started(port: u16, command: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            port,
            success: false,
            killed_processes: Vec::new(),
            command: command.into(),
            command_executed: false,
            command_output: None,
            error: None,
            duration_ms: 0,
        }
    }
}

// ============================================================================
// SystemMetrics
// ============================================================================

/// Host-level metrics. Fields a platform cannot report stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub platform: String,
    pub arch: String,
    pub cpu_count: usize,
    pub load_average: Option<[f64; 3]>,
    pub total_memory_bytes: Option<u64>,
    pub free_memory_bytes: Option<u64>,
    pub uptime_seconds: Option<u64>,
    /// Set when only basic platform info could be gathered.
    pub degraded: bool,
}

impl SystemMetrics {
    /// Platform info that needs no external tool.
    pub fn basic() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            load_average: None,
            total_memory_bytes: None,
            free_memory_bytes: None,
            uptime_seconds: None,
            degraded: false,
        }
    }
}
