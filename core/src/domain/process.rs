//! Process domain models.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ProcessStatus
// ============================================================================

/// Canonical process state, normalized from platform-specific codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    #[default]
    Unknown,
}

impl ProcessStatus {
    /// All statuses.
    pub const ALL: [ProcessStatus; 5] = [
        ProcessStatus::Running,
        ProcessStatus::Sleeping,
        ProcessStatus::Stopped,
        ProcessStatus::Zombie,
        ProcessStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Sleeping => "sleeping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ProcessRecord
// ============================================================================

/// Platform-independent snapshot of one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// Process ID (always > 0).
    pub pid: u32,
    /// Parent process ID, when the platform reports it.
    pub ppid: Option<u32>,
    /// Short executable name (e.g. "node").
    pub name: String,
    /// Full command line.
    pub command: String,
    /// Owning user, when known.
    pub user: Option<String>,
    /// CPU usage in percent, clamped to [0, 100].
    pub cpu_percent: f64,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// Normalized status.
    pub status: ProcessStatus,
    /// Start time, serialized as ISO-8601.
    pub start_time: Option<DateTime<Utc>>,
    /// Ports this process is known to hold.
    pub ports: Vec<u16>,
}

impl ProcessRecord {
    /// Create a record with only identity fields set.
    pub fn new(pid: u32, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            pid,
            ppid: None,
            name: name.into(),
            command: command.into(),
            user: None,
            cpu_percent: 0.0,
            memory_bytes: 0,
            status: ProcessStatus::Unknown,
            start_time: None,
            ports: Vec::new(),
        }
    }

    /// Set the parent PID.
    pub fn with_ppid(mut self, ppid: u32) -> Self {
        self.ppid = Some(ppid);
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: ProcessStatus) -> Self {
        self.status = status;
        self
    }

    /// Set CPU and memory usage.
    pub fn with_usage(mut self, cpu_percent: f64, memory_bytes: u64) -> Self {
        self.cpu_percent = cpu_percent.clamp(0.0, 100.0);
        self.memory_bytes = memory_bytes;
        self
    }

    /// Case-insensitive substring match on name or full command line.
    pub fn matches_name(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query) || self.command.to_lowercase().contains(&query)
    }
}

impl std::fmt::Display for ProcessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (PID: {}, {})", self.name, self.pid, self.status)
    }
}

// ============================================================================
// ProcessFilter
// ============================================================================

/// Field to order process listings by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Pid,
    Name,
    Cpu,
    Memory,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filter and ordering criteria for process listings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFilter {
    /// Substring matched against name or command line.
    #[serde(default)]
    pub name: Option<String>,
    /// Minimum CPU percent (inclusive).
    #[serde(default)]
    pub min_cpu: Option<f64>,
    /// Minimum memory in bytes (inclusive).
    #[serde(default)]
    pub min_memory: Option<u64>,
    /// Statuses to keep. Empty keeps all.
    #[serde(default)]
    pub statuses: HashSet<ProcessStatus>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub order: SortOrder,
}

impl ProcessFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_min_cpu(mut self, cpu: f64) -> Self {
        self.min_cpu = Some(cpu);
        self
    }

    pub fn with_min_memory(mut self, bytes: u64) -> Self {
        self.min_memory = Some(bytes);
        self
    }

    pub fn with_status(mut self, status: ProcessStatus) -> Self {
        self.statuses.insert(status);
        self
    }

    pub fn sorted_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = field;
        self.order = order;
        self
    }

    /// Check if a process matches every criterion.
    pub fn matches(&self, process: &ProcessRecord) -> bool {
        if let Some(ref name) = self.name {
            if !process.matches_name(name) {
                return false;
            }
        }
        if let Some(min) = self.min_cpu {
            if process.cpu_percent < min {
                return false;
            }
        }
        if let Some(min) = self.min_memory {
            if process.memory_bytes < min {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&process.status) {
            return false;
        }
        true
    }

    /// Filter and sort a process list.
    pub fn apply(&self, processes: Vec<ProcessRecord>) -> Vec<ProcessRecord> {
        let mut kept: Vec<ProcessRecord> =
            processes.into_iter().filter(|p| self.matches(p)).collect();

        kept.sort_by(|a, b| {
            let ordering = match self.sort_by {
                SortField::Pid => a.pid.cmp(&b.pid),
                SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                SortField::Cpu => a
                    .cpu_percent
                    .partial_cmp(&b.cpu_percent)
                    .unwrap_or(Ordering::Equal),
                SortField::Memory => a.memory_bytes.cmp(&b.memory_bytes),
            };
            match self.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        kept
    }
}

// ============================================================================
// ProcessTree / PortKillOutcome
// ============================================================================

/// A process and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTree {
    pub process: ProcessRecord,
    pub children: Vec<ProcessTree>,
}

impl ProcessTree {
    /// Number of processes in the tree, root included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(ProcessTree::size).sum::<usize>()
    }

    /// PIDs in depth-first order.
    pub fn pids(&self) -> Vec<u32> {
        let mut pids = vec![self.process.pid];
        for child in &self.children {
            pids.extend(child.pids());
        }
        pids
    }
}

/// Result of killing the occupant of one port.
///
/// `pid` and `process_name` are `None` when the occupant lookup itself
/// failed; `error` then carries the lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortKillOutcome {
    pub port: u16,
    pub pid: Option<u32>,
    pub process_name: Option<String>,
    pub killed: bool,
    pub error: Option<String>,
}

impl PortKillOutcome {
    /// The occupant of `port` could not be determined.
    pub fn lookup_failed(port: u16, error: &crate::error::Error) -> Self {
        Self {
            port,
            pid: None,
            process_name: None,
            killed: false,
            error: Some(error.to_string()),
        }
    }
}
