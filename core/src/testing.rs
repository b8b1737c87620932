//! Test doubles for the capability traits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::adapters::platform::{occupies, owner_of_port};
use crate::domain::{NetworkConnection, ProcessRecord, Protocol, Signal, SystemMetrics};
use crate::error::{Error, Result};
use crate::ports::{CommandRunner, ExecuteOptions, ExecutionResult, HostPlatform, PlatformAdapter};

enum Scripted {
    Stdout(String),
    Fail { code: i32, stderr: String },
}

/// Command runner answering from a table keyed by the space-joined argv.
///
/// Unscripted commands fail as if the tool were not installed.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    responses: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(mut self, command: &str, stdout: &str) -> Self {
        self.responses
            .get_mut()
            .insert(command.to_string(), Scripted::Stdout(stdout.to_string()));
        self
    }

    pub fn fail(mut self, command: &str, code: i32, stderr: &str) -> Self {
        self.responses.get_mut().insert(
            command.to_string(),
            Scripted::Fail {
                code,
                stderr: stderr.to_string(),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn execute(&self, command: &[&str], options: &ExecuteOptions) -> Result<ExecutionResult> {
        let key = command.join(" ");
        self.calls.lock().push(key.clone());

        match self.responses.lock().get(&key) {
            Some(Scripted::Stdout(stdout)) => Ok(ExecutionResult {
                stdout: stdout.clone(),
                exit_code: Some(0),
                ..ExecutionResult::default()
            }),
            Some(Scripted::Fail { code, stderr }) if options.shell => Ok(ExecutionResult {
                stderr: stderr.clone(),
                exit_code: Some(*code),
                ..ExecutionResult::default()
            }),
            Some(Scripted::Fail { code, stderr }) => Err(Error::CommandFailed {
                command: key,
                code: Some(*code),
                stderr: stderr.clone(),
            }),
            None => Err(Error::SystemCallFailed(format!("{}: command not found", key))),
        }
    }
}

/// Mutable world behind [`MockAdapter`].
#[derive(Default)]
pub(crate) struct MockState {
    pub processes: Vec<ProcessRecord>,
    pub connections: Vec<NetworkConnection>,
    pub kill_calls: Vec<(u32, Signal)>,
    /// Kill attempts on these PIDs fail with access denied.
    pub unkillable: HashSet<u32>,
    /// These PIDs survive anything but SIGKILL.
    pub ignore_term: HashSet<u32>,
    /// Number of upcoming connection listings that fail.
    pub failing_scans: usize,
    pub scan_calls: usize,
    pub fail_processes: bool,
    pub fail_metrics: bool,
    /// `get_process_by_port` fails for every port.
    pub fail_port_lookups: bool,
}

/// In-memory platform adapter.
#[derive(Clone, Default)]
pub(crate) struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process(self, process: ProcessRecord) -> Self {
        self.state.lock().processes.push(process);
        self
    }

    /// A process named `name` listening on `port`.
    pub fn with_listener(self, port: u16, pid: u32, name: &str) -> Self {
        {
            let mut state = self.state.lock();
            if !state.processes.iter().any(|p| p.pid == pid) {
                state
                    .processes
                    .push(ProcessRecord::new(pid, name, format!("{} --port {}", name, port)));
            }
            state
                .connections
                .push(NetworkConnection::listening(Protocol::Tcp, "*", port, Some(pid)));
        }
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }
}

impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> HostPlatform {
        HostPlatform::Linux
    }

    async fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let state = self.state.lock();
        if state.fail_processes {
            return Err(Error::SystemCallFailed("ps: command not found".to_string()));
        }
        Ok(state.processes.clone())
    }

    async fn get_process_info(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        let state = self.state.lock();
        if state.fail_processes {
            return Err(Error::SystemCallFailed("ps: command not found".to_string()));
        }
        Ok(state.processes.iter().find(|p| p.pid == pid).cloned())
    }

    async fn kill_process(&self, pid: u32, signal: Signal) -> Result<bool> {
        let mut state = self.state.lock();
        state.kill_calls.push((pid, signal));

        if state.unkillable.contains(&pid) {
            return Err(Error::ProcessAccessDenied(pid.to_string()));
        }
        if !state.processes.iter().any(|p| p.pid == pid) {
            return Err(Error::ProcessNotFound(pid.to_string()));
        }
        if signal != Signal::Kill && state.ignore_term.contains(&pid) {
            return Ok(true);
        }

        state.processes.retain(|p| p.pid != pid);
        state.connections.retain(|c| c.pid != Some(pid));
        Ok(true)
    }

    async fn get_network_connections(&self) -> Result<Vec<NetworkConnection>> {
        let mut state = self.state.lock();
        state.scan_calls += 1;
        if state.failing_scans > 0 {
            state.failing_scans -= 1;
            return Err(Error::PortScanFailed("ss: command not found".to_string()));
        }
        Ok(state.connections.clone())
    }

    async fn get_system_metrics(&self) -> Result<SystemMetrics> {
        if self.state.lock().fail_metrics {
            return Err(Error::SystemCallFailed("uptime: command not found".to_string()));
        }
        Ok(SystemMetrics::basic())
    }

    async fn is_process_running(&self, pid: u32) -> bool {
        self.state.lock().processes.iter().any(|p| p.pid == pid)
    }

    async fn is_port_available(&self, port: u16, protocol: Protocol) -> bool {
        !self
            .state
            .lock()
            .connections
            .iter()
            .any(|c| occupies(c, port, protocol))
    }

    async fn get_process_by_port(&self, port: u16) -> Result<Option<ProcessRecord>> {
        let state = self.state.lock();
        if state.fail_port_lookups {
            return Err(Error::PortScanFailed("lookup unavailable".to_string()));
        }
        let pid = owner_of_port(&state.connections, port);
        Ok(pid.and_then(|pid| state.processes.iter().find(|p| p.pid == pid).cloned()))
    }
}
