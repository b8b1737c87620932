//! Host metric parsers for /proc files, uptime, sysctl, vm_stat and wmic.

use chrono::Utc;

use super::process::parse_wmi_datetime;

/// `/proc/loadavg`: `0.52 0.58 0.59 1/389 12345`.
pub fn parse_proc_loadavg(content: &str) -> Option<[f64; 3]> {
    let mut fields = content.split_whitespace();
    let one = fields.next()?.parse().ok()?;
    let five = fields.next()?.parse().ok()?;
    let fifteen = fields.next()?.parse().ok()?;
    Some([one, five, fifteen])
}

/// `/proc/meminfo`: returns (total, available) in bytes.
pub fn parse_proc_meminfo(content: &str) -> (Option<u64>, Option<u64>) {
    let mut total = None;
    let mut available = None;
    let mut free = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let kb: Option<u64> = value
            .split_whitespace()
            .next()
            .and_then(|v| v.parse().ok());
        match key.trim() {
            "MemTotal" => total = kb.map(|v| v * 1024),
            "MemAvailable" => available = kb.map(|v| v * 1024),
            "MemFree" => free = kb.map(|v| v * 1024),
            _ => {}
        }
    }

    (total, available.or(free))
}

/// `/proc/uptime`: `350735.47 234388.90`.
pub fn parse_proc_uptime(content: &str) -> Option<u64> {
    let seconds: f64 = content.split_whitespace().next()?.parse().ok()?;
    Some(seconds as u64)
}

/// Load averages from `uptime` (Linux uses commas, macOS does not).
///
/// ```text
///  10:15:01 up 4 days,  1:02,  2 users,  load average: 0.52, 0.58, 0.59
///  10:15  up 4 days,  1:02, 2 users, load averages: 1.92 2.10 2.31
/// ```
pub fn parse_uptime_load(output: &str) -> Option<[f64; 3]> {
    let idx = output.find("load average")?;
    let rest = output[idx..].split_once(':')?.1;
    let values: Vec<f64> = rest
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .take(3)
        .collect();
    match values.as_slice() {
        [one, five, fifteen] => Some([*one, *five, *fifteen]),
        _ => None,
    }
}

/// `sysctl -n kern.boottime`: `{ sec = 1760860000, usec = 0 } Sun Oct 19 ...`.
/// Returns seconds since boot.
pub fn parse_sysctl_boottime(output: &str) -> Option<u64> {
    let after = output.split_once("sec =")?.1;
    let boot: i64 = after.split(',').next()?.trim().parse().ok()?;
    let now = Utc::now().timestamp();
    u64::try_from(now - boot).ok()
}

/// `vm_stat`: free plus inactive pages, in bytes.
///
/// ```text
/// Mach Virtual Memory Statistics: (page size of 16384 bytes)
/// Pages free:                               12345.
/// Pages inactive:                          100000.
/// ```
pub fn parse_vm_stat_free(output: &str) -> Option<u64> {
    let page_size: u64 = output
        .split_once("page size of")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or(4096);

    let mut pages: Option<u64> = None;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if matches!(key.trim(), "Pages free" | "Pages inactive") {
            let count: u64 = value.trim().trim_end_matches('.').parse().ok()?;
            pages = Some(pages.unwrap_or(0) + count);
        }
    }

    pages.map(|p| p * page_size)
}

/// Metrics read from `wmic OS get FreePhysicalMemory,TotalVisibleMemorySize,LastBootUpTime /value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WmicOsInfo {
    pub total_memory_bytes: Option<u64>,
    pub free_memory_bytes: Option<u64>,
    pub uptime_seconds: Option<u64>,
}

/// Parse `Key=Value` lines from `wmic OS ... /value` (memory in KB).
pub fn parse_wmic_os(output: &str) -> WmicOsInfo {
    let mut info = WmicOsInfo::default();

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "FreePhysicalMemory" => {
                info.free_memory_bytes = value.parse::<u64>().ok().map(|kb| kb * 1024)
            }
            "TotalVisibleMemorySize" => {
                info.total_memory_bytes = value.parse::<u64>().ok().map(|kb| kb * 1024)
            }
            "LastBootUpTime" => {
                info.uptime_seconds = parse_wmi_datetime(value).and_then(|boot| {
                    u64::try_from((Utc::now() - boot).num_seconds()).ok()
                })
            }
            _ => {}
        }
    }

    info
}
