//! macOS adapter using ps, lsof, sysctl and vm_stat.

use std::sync::Arc;

use tracing::debug;

use super::{
    assume_available, first_success, is_empty_match, owner_of_port, run_stdout, try_bind,
    unix_is_running, unix_kill, Attempt,
};
use crate::adapters::parser::{
    parse_lsof, parse_macos_ps, parse_pid_list, parse_ps_aux, parse_sysctl_boottime,
    parse_uptime_load, parse_vm_stat_free, MACOS_PS_FORMAT,
};
use crate::domain::{NetworkConnection, ProcessRecord, Protocol, Signal, SystemMetrics};
use crate::error::{Error, Result};
use crate::ports::{CommandRunner, ExecuteOptions, HostPlatform, PlatformAdapter};

/// macOS platform adapter.
pub struct DarwinAdapter<R> {
    runner: Arc<R>,
    options: ExecuteOptions,
}

impl<R: CommandRunner> DarwinAdapter<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self::with_options(runner, ExecuteOptions::default())
    }

    pub fn with_options(runner: Arc<R>, options: ExecuteOptions) -> Self {
        Self { runner, options }
    }

    async fn run(&self, command: &[&str]) -> Result<String> {
        run_stdout(self.runner.as_ref(), &self.options, command).await
    }

    async fn processes_via_ps(&self) -> Result<Vec<ProcessRecord>> {
        let processes = parse_macos_ps(&self.run(&["ps", "-axo", MACOS_PS_FORMAT]).await?);
        if processes.is_empty() {
            return Err(Error::SystemCallFailed("ps -axo returned no processes".to_string()));
        }
        Ok(processes)
    }

    async fn processes_via_ps_aux(&self) -> Result<Vec<ProcessRecord>> {
        let processes = parse_ps_aux(&self.run(&["ps", "aux"]).await?, HostPlatform::MacOs);
        if processes.is_empty() {
            return Err(Error::SystemCallFailed("ps aux returned no processes".to_string()));
        }
        Ok(processes)
    }

    /// `lsof -t` for one port. `Ok(vec![])` means nothing holds it.
    async fn lsof_pids(&self, port: u16, protocol: Protocol) -> Result<Vec<u32>> {
        let selector = match protocol {
            Protocol::Tcp => format!("-iTCP:{}", port),
            Protocol::Udp => format!("-iUDP:{}", port),
        };
        let mut command = vec!["lsof", "-t", "-P", "-n", selector.as_str()];
        if protocol == Protocol::Tcp {
            command.push("-sTCP:LISTEN");
        }

        match self.run(&command).await {
            Ok(output) => Ok(parse_pid_list(&output)),
            // lsof exits 1 with no output when nothing matches
            Err(e) if is_empty_match(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn sysctl(&self, name: &str) -> Result<String> {
        Ok(self.run(&["sysctl", "-n", name]).await?.trim().to_string())
    }
}

impl<R> Clone for DarwinAdapter<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            options: self.options.clone(),
        }
    }
}

impl<R: CommandRunner> PlatformAdapter for DarwinAdapter<R> {
    fn platform(&self) -> HostPlatform {
        HostPlatform::MacOs
    }

    async fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let attempts: Vec<Attempt<'_, Vec<ProcessRecord>>> = vec![
            ("ps -axo", Box::pin(self.processes_via_ps())),
            ("ps aux", Box::pin(self.processes_via_ps_aux())),
        ];
        first_success("list_processes", attempts).await
    }

    async fn get_process_info(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        let pid_arg = pid.to_string();
        match self.run(&["ps", "-o", MACOS_PS_FORMAT, "-p", &pid_arg]).await {
            Ok(output) => Ok(parse_macos_ps(&output).into_iter().find(|p| p.pid == pid)),
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
        match self.run(&["lsof", "-i", "-P", "-n"]).await {
            Ok(output) => Ok(parse_lsof(&output)),
            Err(e) if is_empty_match(&e) => Ok(Vec::new()),
            Err(e) => Err(Error::PortScanFailed(e.to_string())),
        }
    }

    async fn get_system_metrics(&self) -> Result<SystemMetrics> {
        let mut metrics = SystemMetrics::basic();
        let mut gathered = false;

        if let Ok(total) = self.sysctl("hw.memsize").await {
            metrics.total_memory_bytes = total.parse().ok();
            gathered |= metrics.total_memory_bytes.is_some();
        }
        if let Ok(vm_stat) = self.run(&["vm_stat"]).await {
            metrics.free_memory_bytes = parse_vm_stat_free(&vm_stat);
            gathered |= metrics.free_memory_bytes.is_some();
        }
        if let Ok(boottime) = self.sysctl("kern.boottime").await {
            metrics.uptime_seconds = parse_sysctl_boottime(&boottime);
            gathered |= metrics.uptime_seconds.is_some();
        }
        if let Ok(uptime) = self.run(&["uptime"]).await {
            metrics.load_average = parse_uptime_load(&uptime);
            gathered |= metrics.load_average.is_some();
        }

        if !gathered {
            return Err(Error::SystemCallFailed(
                "sysctl, vm_stat and uptime all failed".to_string(),
            ));
        }
        Ok(metrics)
    }

    async fn is_process_running(&self, pid: u32) -> bool {
        unix_is_running(self.runner.as_ref(), &self.options, pid).await
    }

    async fn is_port_available(&self, port: u16, protocol: Protocol) -> bool {
        let attempts: Vec<Attempt<'_, bool>> = vec![
            (
                "lsof",
                Box::pin(async move {
                    Ok::<_, Error>(!self.lsof_pids(port, protocol).await?.is_empty())
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
        let pid = match self.lsof_pids(port, Protocol::Tcp).await {
            Ok(pids) if !pids.is_empty() => pids.first().copied(),
            _ => owner_of_port(&self.get_network_connections().await?, port),
        };

        match pid {
            Some(pid) => self.get_process_info(pid).await,
            None => Ok(None),
        }
    }
}
