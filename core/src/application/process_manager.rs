//! Process query and kill service.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::recovery::{ErrorRecoveryManager, RecoveryOptions};
use crate::domain::{
    ensure_port, validate_port_range, PortKillOutcome, ProcessFilter, ProcessRecord, ProcessTree,
    Signal, SystemMetrics,
};
use crate::error::{Error, Result};
use crate::ports::PlatformAdapter;

/// Application service for process-level queries and kills.
///
/// Reads go through the recovery manager; kills go straight to the adapter
/// so a failed kill is never retried behind the caller's back.
pub struct ProcessManager<A: PlatformAdapter> {
    adapter: A,
    recovery: Arc<ErrorRecoveryManager>,
}

impl<A: PlatformAdapter> ProcessManager<A> {
    pub fn new(adapter: A, recovery: Arc<ErrorRecoveryManager>) -> Self {
        Self { adapter, recovery }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// The process holding `port`, with `port` recorded in its port list.
    pub async fn find_by_port(&self, port: u16) -> Result<Option<ProcessRecord>> {
        ensure_port(port)?;
        let found = self
            .recovery
            .execute_with_recovery(
                "process.find_by_port",
                || self.adapter.get_process_by_port(port),
                None,
                RecoveryOptions::default().for_port(port),
            )
            .await?;

        Ok(found.map(|mut process| {
            if !process.ports.contains(&port) {
                process.ports.push(port);
            }
            process
        }))
    }

    pub async fn find_by_pid(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        ensure_pid(pid)?;
        self.recovery
            .execute_with_recovery(
                "process.find_by_pid",
                || self.adapter.get_process_info(pid),
                None,
                RecoveryOptions::default(),
            )
            .await
    }

    /// Case-insensitive substring match against name or command line.
    pub async fn find_by_name(&self, query: &str) -> Result<Vec<ProcessRecord>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Validation("Process name must not be empty".to_string()));
        }
        let processes = self.list_processes().await?;
        Ok(processes
            .into_iter()
            .filter(|p| p.matches_name(query))
            .collect())
    }

    /// Every process passing `filter`, sorted as it asks.
    pub async fn list_all(&self, filter: &ProcessFilter) -> Result<Vec<ProcessRecord>> {
        let processes = self.list_processes().await?;
        Ok(filter.apply(processes))
    }

    /// Signal `pid`: SIGKILL when `force`, SIGTERM otherwise.
    pub async fn kill(&self, pid: u32, force: bool) -> Result<bool> {
        ensure_pid(pid)?;
        self.signal(pid, Signal::for_force(force)).await
    }

    /// Deliver an explicit signal.
    pub async fn signal(&self, pid: u32, signal: Signal) -> Result<bool> {
        ensure_pid(pid)?;
        info!(pid = pid, signal = %signal.name(), "Killing process");
        let delivered = self.adapter.kill_process(pid, signal).await?;
        if delivered {
            info!(pid = pid, "Signal delivered");
        }
        Ok(delivered)
    }

    /// Kill whatever holds `port`. `Ok(None)` when the port is free.
    ///
    /// Kill failures are reported in the outcome rather than as an error.
    pub async fn kill_by_port(&self, port: u16, force: bool) -> Result<Option<PortKillOutcome>> {
        let process = match self.find_by_port(port).await? {
            Some(process) => process,
            None => {
                debug!(port = port, "No process on port");
                return Ok(None);
            }
        };

        let (killed, error) = match self.kill(process.pid, force).await {
            Ok(killed) => (killed, None),
            Err(e) => {
                warn!(port = port, pid = process.pid, error = %e, "Failed to kill port occupant");
                (false, Some(e.to_string()))
            }
        };

        Ok(Some(PortKillOutcome {
            port,
            pid: Some(process.pid),
            process_name: Some(process.name),
            killed,
            error,
        }))
    }

    /// Kill the occupant of every port in `start..=end`, in ascending order.
    ///
    /// Free ports produce no outcome. A failed lookup or kill on one port
    /// does not stop the sweep; it is reported as an outcome carrying the
    /// error, so an unreadable port never looks free. Validation errors
    /// still abort.
    pub async fn kill_by_port_range(
        &self,
        start: u16,
        end: u16,
        force: bool,
    ) -> Result<Vec<PortKillOutcome>> {
        validate_port_range(start, end)?;

        let mut outcomes = Vec::new();
        for port in start..=end {
            match self.kill_by_port(port, force).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e @ Error::Validation(_)) => return Err(e),
                Err(e) => {
                    warn!(port = port, error = %e, "Occupant lookup failed");
                    outcomes.push(PortKillOutcome::lookup_failed(port, &e));
                }
            }
        }

        info!(
            start = start,
            end = end,
            killed = outcomes.iter().filter(|o| o.killed).count(),
            failed = outcomes.iter().filter(|o| o.error.is_some()).count(),
            "Port range sweep complete"
        );
        Ok(outcomes)
    }

    /// `pid` and its descendants. `Ok(None)` when `pid` does not exist.
    pub async fn get_process_tree(&self, pid: u32) -> Result<Option<ProcessTree>> {
        ensure_pid(pid)?;
        let processes = self.list_processes().await?;
        let root = match processes.iter().find(|p| p.pid == pid) {
            Some(root) => root.clone(),
            None => return Ok(None),
        };

        let mut visited = HashSet::new();
        visited.insert(pid);
        Ok(Some(build_tree(root, &processes, &mut visited)))
    }

    /// Host metrics, degrading to basic platform info.
    pub async fn system_metrics(&self) -> Result<SystemMetrics> {
        self.recovery
            .execute_with_recovery(
                "process.system_metrics",
                || self.adapter.get_system_metrics(),
                None,
                RecoveryOptions::default(),
            )
            .await
    }

    async fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        self.recovery
            .execute_with_recovery(
                "process.list",
                || self.adapter.list_processes(),
                None,
                RecoveryOptions::default(),
            )
            .await
    }
}

fn ensure_pid(pid: u32) -> Result<()> {
    if pid == 0 {
        return Err(Error::Validation("Invalid PID 0".to_string()));
    }
    Ok(())
}

// `visited` guards against ppid cycles (pid 0 and 1 can be their own parent).
fn build_tree(
    process: ProcessRecord,
    all: &[ProcessRecord],
    visited: &mut HashSet<u32>,
) -> ProcessTree {
    let children: Vec<ProcessRecord> = all
        .iter()
        .filter(|p| p.ppid == Some(process.pid) && !visited.contains(&p.pid))
        .cloned()
        .collect();

    let mut subtrees = Vec::with_capacity(children.len());
    for child in children {
        if visited.insert(child.pid) {
            subtrees.push(build_tree(child, all, visited));
        }
    }

    ProcessTree {
        process,
        children: subtrees,
    }
}
