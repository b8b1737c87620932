//! Output parsers.
//!
//! Pure functions that turn raw tool output into canonical records. Nothing
//! here spawns processes, so every format is testable on every host.

mod metrics;
mod network;
mod process;
mod units;

pub use metrics::{
    parse_proc_loadavg, parse_proc_meminfo, parse_proc_uptime, parse_sysctl_boottime,
    parse_uptime_load, parse_vm_stat_free, parse_wmic_os, WmicOsInfo,
};
pub use network::{
    detect_network_format, parse_lsof, parse_netstat, parse_network_output, parse_pid_list,
    parse_ss, parse_ss_as, NetworkFormat,
};
pub use process::{
    parse_csv_line, parse_linux_ps, parse_linux_ps_at, parse_linux_ps_classic, parse_macos_ps,
    parse_ps_aux, parse_tasklist_csv, parse_wmi_datetime, parse_wmic_processes,
    LINUX_PS_CLASSIC_FORMAT, LINUX_PS_FORMAT, MACOS_PS_FORMAT,
};
pub use units::{
    executable_basename, normalize_connection_state, parse_address, parse_cpu_usage,
    parse_memory_usage, parse_remote, parse_status, MemoryUnit,
};
