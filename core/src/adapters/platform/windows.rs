//! Windows adapter using wmic, tasklist, taskkill and netstat.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    assume_available, first_success, occupies, owner_of_port, run_stdout, try_bind, Attempt,
};
use crate::adapters::parser::{
    parse_netstat, parse_tasklist_csv, parse_wmic_os, parse_wmic_processes,
};
use crate::domain::{NetworkConnection, ProcessRecord, Protocol, Signal, SystemMetrics};
use crate::error::{Error, Result};
use crate::ports::{CommandRunner, ExecuteOptions, HostPlatform, PlatformAdapter};

/// Properties requested from `wmic process get`.
const WMIC_PROCESS_FIELDS: &str =
    "CommandLine,CreationDate,Name,ParentProcessId,ProcessId,WorkingSetSize";

/// Windows platform adapter.
pub struct WindowsAdapter<R> {
    runner: Arc<R>,
    options: ExecuteOptions,
}

impl<R: CommandRunner> WindowsAdapter<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self::with_options(runner, ExecuteOptions::default())
    }

    pub fn with_options(runner: Arc<R>, options: ExecuteOptions) -> Self {
        Self { runner, options }
    }

    async fn run(&self, command: &[&str]) -> Result<String> {
        run_stdout(self.runner.as_ref(), &self.options, command).await
    }

    async fn processes_via_wmic(&self) -> Result<Vec<ProcessRecord>> {
        let output = self
            .run(&["wmic", "process", "get", WMIC_PROCESS_FIELDS, "/format:csv"])
            .await?;
        let processes = parse_wmic_processes(&output);
        if processes.is_empty() {
            return Err(Error::SystemCallFailed("wmic returned no processes".to_string()));
        }
        Ok(processes)
    }

    async fn processes_via_tasklist(&self) -> Result<Vec<ProcessRecord>> {
        let processes = parse_tasklist_csv(&self.run(&["tasklist", "/FO", "CSV", "/NH"]).await?);
        if processes.is_empty() {
            return Err(Error::SystemCallFailed("tasklist returned no processes".to_string()));
        }
        Ok(processes)
    }

    async fn tasklist_pid(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        let filter = format!("PID eq {}", pid);
        let output = self
            .run(&["tasklist", "/FI", &filter, "/FO", "CSV", "/NH"])
            .await?;
        Ok(parse_tasklist_csv(&output).into_iter().find(|p| p.pid == pid))
    }

    async fn netstat(&self) -> Result<Vec<NetworkConnection>> {
        Ok(parse_netstat(&self.run(&["netstat", "-ano"]).await?))
    }
}

impl<R> Clone for WindowsAdapter<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            options: self.options.clone(),
        }
    }
}

impl<R: CommandRunner> PlatformAdapter for WindowsAdapter<R> {
    fn platform(&self) -> HostPlatform {
        HostPlatform::Windows
    }

    async fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let attempts: Vec<Attempt<'_, Vec<ProcessRecord>>> = vec![
            ("wmic", Box::pin(self.processes_via_wmic())),
            ("tasklist", Box::pin(self.processes_via_tasklist())),
        ];
        first_success("list_processes", attempts).await
    }

    async fn get_process_info(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        let filter = format!("ProcessId={}", pid);
        let direct = self
            .run(&[
                "wmic",
                "process",
                "where",
                &filter,
                "get",
                WMIC_PROCESS_FIELDS,
                "/format:csv",
            ])
            .await;

        match direct {
            // "No Instance(s) Available." goes to stderr with exit 0
            Ok(output) => Ok(parse_wmic_processes(&output).into_iter().find(|p| p.pid == pid)),
            Err(e) => {
                debug!(pid = pid, error = %e, "wmic lookup failed, trying tasklist");
                self.tasklist_pid(pid).await
            }
        }
    }

    async fn kill_process(&self, pid: u32, signal: Signal) -> Result<bool> {
        let force = signal.forces_on_windows();
        let pid_arg = pid.to_string();
        let mut command = vec!["taskkill", "/PID", pid_arg.as_str()];
        if force {
            command.push("/F");
        }
        debug!(pid = pid, force = force, "Executing taskkill");

        match self.runner.execute(&command, &self.options).await {
            Ok(_) => {
                debug!(pid = pid, force = force, "taskkill succeeded");
                Ok(true)
            }
            Err(Error::CommandFailed { stderr, code, command }) => {
                if stderr.contains("not found") || stderr.contains("could not be found") {
                    debug!(pid = pid, "Process not found");
                    return Err(Error::ProcessNotFound(pid.to_string()));
                }
                if stderr.contains("Access is denied") || stderr.contains("access denied") {
                    warn!(pid = pid, "Access denied to kill process");
                    return Err(Error::ProcessAccessDenied(pid.to_string()));
                }
                Err(Error::CommandFailed { command, code, stderr })
            }
            Err(e) => Err(e),
        }
    }

    async fn get_network_connections(&self) -> Result<Vec<NetworkConnection>> {
        self.netstat()
            .await
            .map_err(|e| Error::PortScanFailed(e.to_string()))
    }

    async fn get_system_metrics(&self) -> Result<SystemMetrics> {
        let output = self
            .run(&[
                "wmic",
                "OS",
                "get",
                "FreePhysicalMemory,TotalVisibleMemorySize,LastBootUpTime",
                "/value",
            ])
            .await?;
        let info = parse_wmic_os(&output);

        let mut metrics = SystemMetrics::basic();
        metrics.total_memory_bytes = info.total_memory_bytes;
        metrics.free_memory_bytes = info.free_memory_bytes;
        metrics.uptime_seconds = info.uptime_seconds;
        Ok(metrics)
    }

    async fn is_process_running(&self, pid: u32) -> bool {
        match self.tasklist_pid(pid).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(pid = pid, error = %e, "Failed to check if process is running");
                false
            }
        }
    }

    async fn is_port_available(&self, port: u16, protocol: Protocol) -> bool {
        let attempts: Vec<Attempt<'_, bool>> = vec![
            (
                "netstat",
                Box::pin(async move {
                    let connections = self.netstat().await?;
                    Ok::<_, Error>(connections.iter().any(|c| occupies(c, port, protocol)))
                }),
            ),
            (
                "bind",
                Box::pin(async move { try_bind(port, protocol).map(|free| !free) }),
            ),
        ];
        match first_success("is_port_available", attempts).await {
            Ok(in_use) => !in_use,
            Err(e) => assume_available(port, protocol, &e),
        }
    }

    async fn get_process_by_port(&self, port: u16) -> Result<Option<ProcessRecord>> {
        let connections = self.get_network_connections().await?;
        match owner_of_port(&connections, port) {
            // PID 0 is the idle pseudo-process
            Some(pid) if pid > 0 => self.get_process_info(pid).await,
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    const NETSTAT: &str = "\
  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:3000           0.0.0.0:0              LISTENING       5432
  TCP    127.0.0.1:4000         127.0.0.1:3000         ESTABLISHED     777
  UDP    0.0.0.0:5353           *:*                                    1200
";

    fn adapter(runner: ScriptedRunner) -> WindowsAdapter<ScriptedRunner> {
        WindowsAdapter::new(Arc::new(runner))
    }

    #[tokio::test]
    async fn test_kill_adds_force_for_term_and_kill() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("taskkill /PID 42 /F", "SUCCESS")
                .ok("taskkill /PID 43", "SUCCESS"),
        );
        let adapter = WindowsAdapter::new(runner.clone());
        assert!(adapter.kill_process(42, Signal::Term).await.unwrap());
        assert!(adapter.kill_process(42, Signal::Kill).await.unwrap());
        assert!(adapter.kill_process(43, Signal::Int).await.unwrap());
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_kill_maps_errors() {
        let runner = ScriptedRunner::new()
            .fail("taskkill /PID 1 /F", 128, "ERROR: The process \"1\" not found.")
            .fail("taskkill /PID 4 /F", 1, "ERROR: Access is denied.");
        let adapter = adapter(runner);
        let err = adapter.kill_process(1, Signal::Kill).await.unwrap_err();
        assert_eq!(err.code(), "PROCESS_NOT_FOUND");
        let err = adapter.kill_process(4, Signal::Kill).await.unwrap_err();
        assert_eq!(err.code(), "PROCESS_ACCESS_DENIED");
    }

    #[tokio::test]
    async fn test_port_availability_polarity() {
        let adapter = adapter(ScriptedRunner::new().ok("netstat -ano", NETSTAT));
        assert!(!adapter.is_port_available(3000, Protocol::Tcp).await);
        // an outbound connection's local port is not a listener
        assert!(adapter.is_port_available(4000, Protocol::Tcp).await);
        assert!(!adapter.is_port_available(5353, Protocol::Udp).await);
        assert!(adapter.is_port_available(5353, Protocol::Tcp).await);
    }

    #[tokio::test]
    async fn test_get_process_by_port_via_wmic() {
        let runner = ScriptedRunner::new().ok("netstat -ano", NETSTAT).ok(
            "wmic process where ProcessId=5432 get CommandLine,CreationDate,Name,ParentProcessId,ProcessId,WorkingSetSize /format:csv",
            "Node,CommandLine,CreationDate,Name,ParentProcessId,ProcessId,WorkingSetSize\n\
             HOST,node server.js,20261019101500.000000+000,node.exe,4,5432,1024\n",
        );
        let process = adapter(runner).get_process_by_port(3000).await.unwrap().unwrap();
        assert_eq!(process.pid, 5432);
        assert_eq!(process.command, "node server.js");
    }

    #[tokio::test]
    async fn test_list_processes_falls_back_to_tasklist() {
        let runner = ScriptedRunner::new().ok(
            "tasklist /FO CSV /NH",
            "\"node.exe\",\"5432\",\"Console\",\"1\",\"45,000 K\"\n",
        );
        let processes = adapter(runner).list_processes().await.unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].name, "node.exe");
    }

    #[tokio::test]
    async fn test_is_process_running() {
        let runner = ScriptedRunner::new()
            .ok(
                "tasklist /FI PID eq 5432 /FO CSV /NH",
                "\"node.exe\",\"5432\",\"Console\",\"1\",\"45,000 K\"\n",
            )
            .ok(
                "tasklist /FI PID eq 9 /FO CSV /NH",
                "INFO: No tasks are running which match the specified criteria.\n",
            );
        let adapter = adapter(runner);
        assert!(adapter.is_process_running(5432).await);
        assert!(!adapter.is_process_running(9).await);
    }

    #[tokio::test]
    async fn test_metrics() {
        let runner = ScriptedRunner::new().ok(
            "wmic OS get FreePhysicalMemory,TotalVisibleMemorySize,LastBootUpTime /value",
            "FreePhysicalMemory=1024\r\nTotalVisibleMemorySize=4096\r\n",
        );
        let metrics = adapter(runner).get_system_metrics().await.unwrap();
        assert_eq!(metrics.total_memory_bytes, Some(4096 * 1024));
        assert_eq!(metrics.free_memory_bytes, Some(1024 * 1024));
    }
}
