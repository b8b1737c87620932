//! Platform adapters.
//!
//! Each adapter shells out to its OS's tools through a [`CommandRunner`] and
//! normalizes the output with the parsers. Tool failures fall through an
//! ordered list of alternatives via [`first_success`].

mod darwin;
mod linux;
mod windows;

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, UdpSocket};
use std::pin::Pin;

use tracing::{debug, warn};

use crate::domain::{NetworkConnection, ProcessRecord, Protocol, Signal, SystemMetrics};
use crate::error::{Error, Result};
use crate::ports::{CommandRunner, ExecuteOptions, HostPlatform, PlatformAdapter};

pub use darwin::DarwinAdapter;
pub use linux::LinuxAdapter;
pub use windows::WindowsAdapter;

use super::executor::CommandExecutor;

/// One named way of producing a value.
pub(crate) type Attempt<'a, T> = (
    &'static str,
    Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
);

/// Try each attempt in order; return the first success or the last failure.
pub(crate) async fn first_success<T>(operation: &str, attempts: Vec<Attempt<'_, T>>) -> Result<T> {
    let mut last_error = None;

    for (strategy, attempt) in attempts {
        match attempt.await {
            Ok(value) => {
                debug!(operation = operation, strategy = strategy, "Strategy succeeded");
                return Ok(value);
            }
            Err(e) => {
                debug!(
                    operation = operation,
                    strategy = strategy,
                    error = %e,
                    "Strategy failed, trying next"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        Error::SystemCallFailed(format!("{}: no strategy available", operation))
    }))
}

/// Bind and close a socket on loopback.
///
/// `Ok(true)` when the bind succeeded and `Ok(false)` when the address is
/// taken. Any other bind failure (a privileged port without the rights to
/// bind it, no loopback) says nothing about occupancy and is returned as an
/// error.
pub fn try_bind(port: u16, protocol: Protocol) -> Result<bool> {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
    let bound = match protocol {
        Protocol::Tcp => TcpListener::bind(addr).map(drop),
        Protocol::Udp => UdpSocket::bind(addr).map(drop),
    };
    match bound {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            debug!(port = port, protocol = %protocol, "Bind check found port in use");
            Ok(false)
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!(port = port, protocol = %protocol, "Bind check not permitted");
            Err(Error::PermissionDenied(format!(
                "Cannot bind {} port {} to check it: {}",
                protocol, port, e
            )))
        }
        Err(e) => {
            debug!(port = port, protocol = %protocol, error = %e, "Bind check inconclusive");
            Err(e.into())
        }
    }
}

/// Whether a socket record holds `port` for `protocol`.
///
/// TCP counts only listening sockets; any bound UDP socket counts.
pub(crate) fn occupies(connection: &NetworkConnection, port: u16, protocol: Protocol) -> bool {
    connection.local_port == port
        && connection.protocol == protocol
        && (protocol == Protocol::Udp || connection.is_listening())
}

/// Pick the owner of `port` from a socket table, listening sockets first.
pub(crate) fn owner_of_port(connections: &[NetworkConnection], port: u16) -> Option<u32> {
    connections
        .iter()
        .filter(|c| c.local_port == port && c.pid.is_some())
        .min_by_key(|c| !c.is_listening())
        .and_then(|c| c.pid)
}

/// Final availability tier: nothing could answer, so assume the port is free.
pub(crate) fn assume_available(port: u16, protocol: Protocol, error: &Error) -> bool {
    warn!(
        port = port,
        protocol = %protocol,
        error = %error,
        "All port checks failed, assuming port is available"
    );
    true
}

/// Run a command and return stdout.
pub(crate) async fn run_stdout<R: CommandRunner>(
    runner: &R,
    options: &ExecuteOptions,
    command: &[&str],
) -> Result<String> {
    Ok(runner.execute(command, options).await?.stdout)
}

/// True when the error is a tool reporting "nothing matched" with exit 1.
pub(crate) fn is_empty_match(error: &Error) -> bool {
    matches!(
        error,
        Error::CommandFailed { code: Some(1), stderr, .. } if stderr.trim().is_empty()
    )
}

/// Deliver a signal with `kill -SIG pid` and map its complaints.
pub(crate) async fn unix_kill<R: CommandRunner>(
    runner: &R,
    options: &ExecuteOptions,
    pid: u32,
    signal: Signal,
) -> Result<bool> {
    let flag = format!("-{}", signal.unix_name());
    let pid_arg = pid.to_string();
    debug!(pid = pid, signal = signal.name(), "Sending signal to process");

    match runner.execute(&["kill", &flag, &pid_arg], options).await {
        Ok(_) => {
            debug!(pid = pid, signal = signal.name(), "Signal sent successfully");
            Ok(true)
        }
        Err(Error::CommandFailed { stderr, code, .. }) => {
            if stderr.contains("No such process") {
                debug!(pid = pid, "Process not found");
                return Err(Error::ProcessNotFound(pid.to_string()));
            }
            if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
                warn!(pid = pid, "Permission denied to kill process");
                return Err(Error::ProcessAccessDenied(pid.to_string()));
            }
            Err(Error::CommandFailed {
                command: format!("kill {} {}", flag, pid),
                code,
                stderr,
            })
        }
        Err(e) => Err(e),
    }
}

/// `ps -o stat= -p pid`: alive unless missing or a zombie.
pub(crate) async fn unix_is_running<R: CommandRunner>(
    runner: &R,
    options: &ExecuteOptions,
    pid: u32,
) -> bool {
    let pid_arg = pid.to_string();
    match run_stdout(runner, options, &["ps", "-o", "stat=", "-p", &pid_arg]).await {
        Ok(stat) => {
            let stat = stat.trim();
            let running = !stat.is_empty() && !stat.starts_with('Z');
            debug!(pid = pid, running = running, "Process running check");
            running
        }
        Err(_) => false,
    }
}

/// Adapter for the host OS, chosen once at startup.
pub enum NativeAdapter<R: CommandRunner = CommandExecutor> {
    Linux(LinuxAdapter<R>),
    MacOs(DarwinAdapter<R>),
    Windows(WindowsAdapter<R>),
}

impl<R: CommandRunner> NativeAdapter<R> {
    /// Adapter for `platform` speaking through `runner`.
    pub fn for_platform(
        platform: HostPlatform,
        runner: std::sync::Arc<R>,
        options: ExecuteOptions,
    ) -> Self {
        match platform {
            HostPlatform::Linux => NativeAdapter::Linux(LinuxAdapter::with_options(runner, options)),
            HostPlatform::MacOs => {
                NativeAdapter::MacOs(DarwinAdapter::with_options(runner, options))
            }
            HostPlatform::Windows => {
                NativeAdapter::Windows(WindowsAdapter::with_options(runner, options))
            }
        }
    }

    /// Adapter for the running OS.
    pub fn detect(runner: std::sync::Arc<R>, options: ExecuteOptions) -> Result<Self> {
        Ok(Self::for_platform(HostPlatform::current()?, runner, options))
    }
}

impl<R: CommandRunner> Clone for NativeAdapter<R> {
    fn clone(&self) -> Self {
        match self {
            NativeAdapter::Linux(a) => NativeAdapter::Linux(a.clone()),
            NativeAdapter::MacOs(a) => NativeAdapter::MacOs(a.clone()),
            NativeAdapter::Windows(a) => NativeAdapter::Windows(a.clone()),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $adapter:ident => $call:expr) => {
        match $self {
            NativeAdapter::Linux($adapter) => $call,
            NativeAdapter::MacOs($adapter) => $call,
            NativeAdapter::Windows($adapter) => $call,
        }
    };
}

impl<R: CommandRunner> PlatformAdapter for NativeAdapter<R> {
    fn platform(&self) -> HostPlatform {
        delegate!(self, a => a.platform())
    }

    async fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        delegate!(self, a => a.list_processes().await)
    }

    async fn get_process_info(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        delegate!(self, a => a.get_process_info(pid).await)
    }

    async fn kill_process(&self, pid: u32, signal: Signal) -> Result<bool> {
        delegate!(self, a => a.kill_process(pid, signal).await)
    }

    async fn get_network_connections(&self) -> Result<Vec<NetworkConnection>> {
        delegate!(self, a => a.get_network_connections().await)
    }

    async fn get_system_metrics(&self) -> Result<SystemMetrics> {
        delegate!(self, a => a.get_system_metrics().await)
    }

    async fn is_process_running(&self, pid: u32) -> bool {
        delegate!(self, a => a.is_process_running(pid).await)
    }

    async fn is_port_available(&self, port: u16, protocol: Protocol) -> bool {
        delegate!(self, a => a.is_port_available(port, protocol).await)
    }

    async fn get_process_by_port(&self, port: u16) -> Result<Option<ProcessRecord>> {
        delegate!(self, a => a.get_process_by_port(port).await)
    }
}
