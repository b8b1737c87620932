//! Platform adapter port (interface).

use serde::{Deserialize, Serialize};

use crate::domain::{NetworkConnection, ProcessRecord, Protocol, Signal, SystemMetrics};
use crate::error::{Error, Result};

/// Operating system family an adapter targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    Linux,
    MacOs,
    Windows,
}

impl HostPlatform {
    /// The platform this binary runs on.
    pub fn current() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` value.
    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "linux" => Ok(HostPlatform::Linux),
            "macos" => Ok(HostPlatform::MacOs),
            "windows" => Ok(HostPlatform::Windows),
            other => Err(Error::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn is_unix(&self) -> bool {
        !matches!(self, HostPlatform::Windows)
    }
}

impl std::fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HostPlatform::Linux => "linux",
            HostPlatform::MacOs => "macos",
            HostPlatform::Windows => "windows",
        };
        f.write_str(name)
    }
}

/// Port for OS introspection.
///
/// Each platform variant invokes its native tools and normalizes their
/// output into canonical records. Implementations fall back through
/// secondary tools before giving up.
pub trait PlatformAdapter: Send + Sync {
    /// The platform this adapter speaks to.
    fn platform(&self) -> HostPlatform;

    /// List every process.
    fn list_processes(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ProcessRecord>>> + Send;

    /// Look up one process. `Ok(None)` when it does not exist.
    fn get_process_info(
        &self,
        pid: u32,
    ) -> impl std::future::Future<Output = Result<Option<ProcessRecord>>> + Send;

    /// Deliver `signal` to `pid`.
    ///
    /// Returns `Ok(true)` when the signal was delivered.
    fn kill_process(
        &self,
        pid: u32,
        signal: Signal,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// List sockets with their owners where the tool reports them.
    fn get_network_connections(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<NetworkConnection>>> + Send;

    /// Host metrics.
    fn get_system_metrics(&self) -> impl std::future::Future<Output = Result<SystemMetrics>> + Send;

    /// Whether `pid` is alive. Zombies count as gone.
    fn is_process_running(&self, pid: u32) -> impl std::future::Future<Output = bool> + Send;

    /// Whether nothing holds `port` for `protocol`.
    ///
    /// Never fails: when every check errors the port is assumed available
    /// and the assumption is logged.
    fn is_port_available(
        &self,
        port: u16,
        protocol: Protocol,
    ) -> impl std::future::Future<Output = bool> + Send;

    /// The process holding `port`, if any.
    fn get_process_by_port(
        &self,
        port: u16,
    ) -> impl std::future::Future<Output = Result<Option<ProcessRecord>>> + Send;
}
