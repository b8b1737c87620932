//! Linux adapter using ps, ss (netstat and lsof fallbacks) and /proc.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::debug;

use super::{
    assume_available, first_success, is_empty_match, occupies, owner_of_port, run_stdout,
    try_bind, unix_is_running, unix_kill, Attempt,
};
use crate::adapters::parser::{
    parse_linux_ps, parse_linux_ps_classic, parse_lsof, parse_netstat, parse_pid_list,
    parse_proc_loadavg, parse_proc_meminfo, parse_proc_uptime, parse_ps_aux, parse_ss,
    parse_ss_as, parse_uptime_load, LINUX_PS_CLASSIC_FORMAT, LINUX_PS_FORMAT,
};
use crate::domain::{NetworkConnection, ProcessRecord, Protocol, Signal, SystemMetrics};
use crate::error::{Error, Result};
use crate::ports::{CommandRunner, ExecuteOptions, HostPlatform, PlatformAdapter};

/// Linux platform adapter.
pub struct LinuxAdapter<R> {
    runner: Arc<R>,
    options: ExecuteOptions,
    proc_root: PathBuf,
}

impl<R: CommandRunner> LinuxAdapter<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self::with_options(runner, ExecuteOptions::default())
    }

    pub fn with_options(runner: Arc<R>, options: ExecuteOptions) -> Self {
        Self {
            runner,
            options,
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Read host metrics from another procfs mount.
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    async fn run(&self, command: &[&str]) -> Result<String> {
        run_stdout(self.runner.as_ref(), &self.options, command).await
    }

    async fn processes_via_ps_eo(&self) -> Result<Vec<ProcessRecord>> {
        let output = self.run(&["ps", "-eo", LINUX_PS_FORMAT, "--no-headers"]).await?;
        non_empty(parse_linux_ps(&output), "ps -eo")
    }

    async fn processes_via_ps_eo_classic(&self) -> Result<Vec<ProcessRecord>> {
        let output = self
            .run(&["ps", "-eo", LINUX_PS_CLASSIC_FORMAT, "--no-headers"])
            .await?;
        non_empty(parse_linux_ps_classic(&output), "ps -eo (classic)")
    }

    async fn processes_via_ps_aux(&self) -> Result<Vec<ProcessRecord>> {
        let output = self.run(&["ps", "aux"]).await?;
        non_empty(parse_ps_aux(&output, HostPlatform::Linux), "ps aux")
    }

    async fn connections_via_ss(&self) -> Result<Vec<NetworkConnection>> {
        Ok(parse_ss(&self.run(&["ss", "-tulnp"]).await?))
    }

    async fn connections_via_netstat(&self) -> Result<Vec<NetworkConnection>> {
        Ok(parse_netstat(&self.run(&["netstat", "-tulnp"]).await?))
    }

    async fn connections_via_lsof(&self) -> Result<Vec<NetworkConnection>> {
        match self.run(&["lsof", "-i", "-P", "-n"]).await {
            Ok(output) => Ok(parse_lsof(&output)),
            Err(e) if is_empty_match(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn metrics_via_proc(&self) -> Result<SystemMetrics> {
        let loadavg = fs::read_to_string(self.proc_root.join("loadavg")).await?;
        let load_average = parse_proc_loadavg(&loadavg)
            .ok_or_else(|| Error::SystemCallFailed("Unreadable /proc/loadavg".to_string()))?;

        let mut metrics = SystemMetrics::basic();
        metrics.load_average = Some(load_average);

        if let Ok(meminfo) = fs::read_to_string(self.proc_root.join("meminfo")).await {
            let (total, free) = parse_proc_meminfo(&meminfo);
            metrics.total_memory_bytes = total;
            metrics.free_memory_bytes = free;
        }
        if let Ok(uptime) = fs::read_to_string(self.proc_root.join("uptime")).await {
            metrics.uptime_seconds = parse_proc_uptime(&uptime);
        }
        Ok(metrics)
    }

    async fn metrics_via_uptime(&self) -> Result<SystemMetrics> {
        let output = self.run(&["uptime"]).await?;
        let load_average = parse_uptime_load(&output)
            .ok_or_else(|| Error::SystemCallFailed("Unparseable uptime output".to_string()))?;

        let mut metrics = SystemMetrics::basic();
        metrics.load_average = Some(load_average);
        Ok(metrics)
    }

    async fn port_in_use_via_ss(&self, port: u16, protocol: Protocol) -> Result<bool> {
        let flag = match protocol {
            Protocol::Tcp => "-tln",
            Protocol::Udp => "-uln",
        };
        let connections = parse_ss_as(&self.run(&["ss", flag]).await?, protocol);
        Ok(connections.iter().any(|c| occupies(c, port, protocol)))
    }

    async fn port_in_use_via_netstat(&self, port: u16, protocol: Protocol) -> Result<bool> {
        let connections = self.connections_via_netstat().await?;
        Ok(connections.iter().any(|c| occupies(c, port, protocol)))
    }

    async fn pid_via_lsof(&self, port: u16) -> Result<Option<u32>> {
        let selector = format!("-iTCP:{}", port);
        match self.run(&["lsof", "-t", &selector, "-sTCP:LISTEN"]).await {
            Ok(output) => Ok(parse_pid_list(&output).into_iter().next()),
            Err(e) if is_empty_match(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<R> Clone for LinuxAdapter<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            options: self.options.clone(),
            proc_root: self.proc_root.clone(),
        }
    }
}

fn non_empty(processes: Vec<ProcessRecord>, tool: &str) -> Result<Vec<ProcessRecord>> {
    if processes.is_empty() {
        return Err(Error::SystemCallFailed(format!("{} returned no processes", tool)));
    }
    Ok(processes)
}

impl<R: CommandRunner> PlatformAdapter for LinuxAdapter<R> {
    fn platform(&self) -> HostPlatform {
        HostPlatform::Linux
    }

    async fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let attempts: Vec<Attempt<'_, Vec<ProcessRecord>>> = vec![
            ("ps -eo", Box::pin(self.processes_via_ps_eo())),
            ("ps -eo (classic)", Box::pin(self.processes_via_ps_eo_classic())),
            ("ps aux", Box::pin(self.processes_via_ps_aux())),
        ];
        first_success("list_processes", attempts).await
    }

    async fn get_process_info(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        let pid_arg = pid.to_string();
        let direct = self
            .run(&["ps", "-o", LINUX_PS_FORMAT, "--no-headers", "-p", &pid_arg])
            .await;

        match direct {
            Ok(output) => Ok(parse_linux_ps(&output).into_iter().find(|p| p.pid == pid)),
            // ps exits 1 when the PID matched nothing
            Err(e) if is_empty_match(&e) => Ok(None),
            Err(e) => {
                debug!(pid = pid, error = %e, "Direct ps lookup failed, scanning full list");
                let processes = self.list_processes().await?;
                Ok(processes.into_iter().find(|p| p.pid == pid))
            }
        }
    }

    async fn kill_process(&self, pid: u32, signal: Signal) -> Result<bool> {
        unix_kill(self.runner.as_ref(), &self.options, pid, signal).await
    }

    async fn get_network_connections(&self) -> Result<Vec<NetworkConnection>> {
        let attempts: Vec<Attempt<'_, Vec<NetworkConnection>>> = vec![
            ("ss", Box::pin(self.connections_via_ss())),
            ("netstat", Box::pin(self.connections_via_netstat())),
            ("lsof", Box::pin(self.connections_via_lsof())),
        ];
        first_success("get_network_connections", attempts)
            .await
            .map_err(|e| Error::PortScanFailed(e.to_string()))
    }

    async fn get_system_metrics(&self) -> Result<SystemMetrics> {
        let attempts: Vec<Attempt<'_, SystemMetrics>> = vec![
            ("/proc", Box::pin(self.metrics_via_proc())),
            ("uptime", Box::pin(self.metrics_via_uptime())),
        ];
        first_success("get_system_metrics", attempts).await
    }

    async fn is_process_running(&self, pid: u32) -> bool {
        unix_is_running(self.runner.as_ref(), &self.options, pid).await
    }

    async fn is_port_available(&self, port: u16, protocol: Protocol) -> bool {
        let attempts: Vec<Attempt<'_, bool>> = vec![
            ("ss", Box::pin(self.port_in_use_via_ss(port, protocol))),
            ("netstat", Box::pin(self.port_in_use_via_netstat(port, protocol))),
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
        let pid = match owner_of_port(&connections, port) {
            Some(pid) => Some(pid),
            // ss hides owners of other users' sockets without root
            None if connections.iter().any(|c| c.local_port == port) => {
                self.pid_via_lsof(port).await.unwrap_or(None)
            }
            None => None,
        };

        match pid {
            Some(pid) => self.get_process_info(pid).await,
            None => Ok(None),
        }
    }
}
