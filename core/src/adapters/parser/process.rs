//! Process listing parsers.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};

use super::units::{
    executable_basename, parse_cpu_usage, parse_memory_usage, parse_status, MemoryUnit,
};
use crate::domain::{ProcessRecord, ProcessStatus};
use crate::ports::HostPlatform;

/// Columns requested from Linux `ps -eo`.
///
/// Token columns come first. `comm` is padded to the kernel's name limit and
/// `args` runs to the end of the line, so spaces in either stay unambiguous.
pub const LINUX_PS_FORMAT: &str = "user,pid,ppid,pcpu,rss,stat,etimes,comm:15,args";

/// The classic `ps -eo` layout, for `ps` builds without width suffixes or
/// `etimes`. A name containing spaces shifts its columns.
pub const LINUX_PS_CLASSIC_FORMAT: &str = "user,pid,ppid,comm,args,pcpu,rss,stat";

/// Linux truncates process names to this many characters.
const LINUX_COMM_WIDTH: usize = 15;

/// Columns requested from macOS `ps -axo`.
pub const MACOS_PS_FORMAT: &str = "pid,ppid,user,pcpu,rss,stat,args";

fn parse_pid(token: &str) -> Option<u32> {
    token.parse::<u32>().ok().filter(|pid| *pid > 0)
}

/// Split `count` whitespace-separated tokens off the front of `line`,
/// returning them with the untouched remainder (leading separator included).
fn split_leading(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut tokens = Vec::with_capacity(count);
    let mut rest = line;
    for _ in 0..count {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        tokens.push(&rest[..end]);
        rest = &rest[end..];
    }
    Some((tokens, rest))
}

/// Parse Linux `ps -eo user,pid,ppid,pcpu,rss,stat,etimes,comm:15,args`.
///
/// ```text
/// user  1234     1 12.3 20480 S     3600 node            node server.js
/// dev   4711  1200  4.0 90000 Sl      60 Web Content     /usr/lib/firefox/firefox -contentproc
/// ```
pub fn parse_linux_ps(output: &str) -> Vec<ProcessRecord> {
    parse_linux_ps_at(output, Utc::now())
}

/// [`parse_linux_ps`] with start times computed relative to `now`.
pub fn parse_linux_ps_at(output: &str, now: DateTime<Utc>) -> Vec<ProcessRecord> {
    let mut processes = Vec::new();

    for line in output.lines() {
        let Some((parts, rest)) = split_leading(line, 7) else {
            continue;
        };
        let Some(pid) = parse_pid(parts[1]) else {
            continue;
        };

        // one separator, then the fixed-width name, then the command line
        let tail = rest.strip_prefix(' ').unwrap_or(rest);
        let split = tail
            .char_indices()
            .nth(LINUX_COMM_WIDTH)
            .map(|(i, _)| i)
            .unwrap_or(tail.len());
        let name = tail[..split].trim();
        if name.is_empty() {
            continue;
        }
        let args = tail[split..].trim();
        let command = if args.is_empty() { name } else { args };

        let mut record = ProcessRecord::new(pid, name, command)
            .with_usage(
                parse_cpu_usage(parts[3]),
                parse_memory_usage(parts[4], MemoryUnit::Kilobytes).unwrap_or(0),
            )
            .with_status(parse_status(parts[5], HostPlatform::Linux));
        record.ppid = parts[2].parse().ok();
        record.user = Some(parts[0].to_string());
        record.start_time = parts[6]
            .parse::<u32>()
            .ok()
            .and_then(|secs| now.checked_sub_signed(chrono::Duration::seconds(i64::from(secs))));
        processes.push(record);
    }

    processes
}

/// Parse Linux `ps -eo user,pid,ppid,comm,args,pcpu,rss,stat`.
///
/// The first four and last three columns are single tokens; whatever lies
/// between is the full command line.
///
/// ```text
/// user 1234 1 node node server.js 12.3 20480 S
/// ```
pub fn parse_linux_ps_classic(output: &str) -> Vec<ProcessRecord> {
    let mut processes = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 7 {
            continue;
        }
        let Some(pid) = parse_pid(parts[1]) else {
            continue;
        };

        let n = parts.len();
        let name = parts[3];
        let command = if n > 7 {
            parts[4..n - 3].join(" ")
        } else {
            name.to_string()
        };

        let mut record = ProcessRecord::new(pid, name, command)
            .with_usage(
                parse_cpu_usage(parts[n - 3]),
                parse_memory_usage(parts[n - 2], MemoryUnit::Kilobytes).unwrap_or(0),
            )
            .with_status(parse_status(parts[n - 1], HostPlatform::Linux));
        record.ppid = parts[2].parse().ok();
        record.user = Some(parts[0].to_string());
        processes.push(record);
    }

    processes
}

/// Parse `ps aux` (Linux and BSD layout).
///
/// ```text
/// USER  PID %CPU %MEM    VSZ   RSS TTY STAT START   TIME COMMAND
/// dev  4242  1.5  0.8 123456 20480 ?   Sl   09:15   0:03 node server.js
/// ```
pub fn parse_ps_aux(output: &str, platform: HostPlatform) -> Vec<ProcessRecord> {
    let mut processes = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 11 {
            continue;
        }
        let Some(pid) = parse_pid(parts[1]) else {
            continue;
        };

        let command = parts[10..].join(" ");
        let name = executable_basename(parts[10]);

        let mut record = ProcessRecord::new(pid, name, command)
            .with_usage(
                parse_cpu_usage(parts[2]),
                parse_memory_usage(parts[5], MemoryUnit::Kilobytes).unwrap_or(0),
            )
            .with_status(parse_status(parts[7], platform));
        record.user = Some(parts[0].to_string());
        record.start_time = parse_clock_start(parts[8]);
        processes.push(record);
    }

    processes
}

/// `HH:MM` start column means today, local time. Older entries use a date
/// form that is not precise enough to keep.
fn parse_clock_start(token: &str) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(token, "%H:%M").ok()?;
    let naive = Local::now().date_naive().and_time(time);
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse macOS `ps -axo pid,ppid,user,pcpu,rss,stat,args`.
pub fn parse_macos_ps(output: &str) -> Vec<ProcessRecord> {
    let mut processes = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 7 {
            continue;
        }
        let Some(pid) = parse_pid(parts[0]) else {
            continue;
        };

        let command = parts[6..].join(" ");
        let name = executable_basename(parts[6]);

        let mut record = ProcessRecord::new(pid, name, command)
            .with_usage(
                parse_cpu_usage(parts[3]),
                parse_memory_usage(parts[4], MemoryUnit::Kilobytes).unwrap_or(0),
            )
            .with_status(parse_status(parts[5], HostPlatform::MacOs));
        record.ppid = parts[1].parse().ok();
        record.user = Some(parts[2].to_string());
        processes.push(record);
    }

    processes
}

/// Parse `wmic process get CommandLine,CreationDate,Name,ParentProcessId,ProcessId,WorkingSetSize /format:csv`.
///
/// wmic orders columns alphabetically after `Node`. `CommandLine` may itself
/// contain commas, so the fixed columns are read from both ends.
///
/// ```text
/// Node,CommandLine,CreationDate,Name,ParentProcessId,ProcessId,WorkingSetSize
/// HOST,node server.js --a=1,2,20261019101500.000000+120,node.exe,4,5432,20971520
/// ```
pub fn parse_wmic_processes(output: &str) -> Vec<ProcessRecord> {
    let mut processes = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Node,") {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 7 {
            continue;
        }
        let n = fields.len();
        let Some(pid) = parse_pid(fields[n - 2].trim()) else {
            continue;
        };

        let name = fields[n - 4].trim();
        let command_line = fields[1..n - 5].join(",");
        let command = if command_line.trim().is_empty() {
            name.to_string()
        } else {
            command_line.trim().to_string()
        };

        // Listed processes are live; Windows has no zombie state.
        let mut record = ProcessRecord::new(pid, name, command)
            .with_usage(
                0.0,
                parse_memory_usage(fields[n - 1], MemoryUnit::Bytes).unwrap_or(0),
            )
            .with_status(ProcessStatus::Running);
        record.ppid = fields[n - 3].trim().parse().ok();
        record.start_time = parse_wmi_datetime(fields[n - 5].trim());
        processes.push(record);
    }

    processes
}

/// Parse a WMI datetime (`yyyymmddHHMMSS.ffffff+UUU`, offset in minutes).
pub fn parse_wmi_datetime(value: &str) -> Option<DateTime<Utc>> {
    let stamp = value.get(..14)?;
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok()?;

    let offset_minutes = value
        .rfind(['+', '-'])
        .filter(|idx| *idx >= 14)
        .and_then(|idx| value[idx..].parse::<i32>().ok())
        .unwrap_or(0);
    let offset = FixedOffset::east_opt(offset_minutes * 60)?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse `tasklist /FO CSV /NH`.
///
/// ```text
/// "node.exe","5432","Console","1","45,000 K"
/// ```
pub fn parse_tasklist_csv(output: &str) -> Vec<ProcessRecord> {
    let mut processes = Vec::new();

    for line in output.lines() {
        let fields = parse_csv_line(line.trim());
        if fields.len() < 5 {
            continue;
        }
        let Some(pid) = parse_pid(fields[1].trim()) else {
            continue;
        };

        let name = fields[0].clone();
        let record = ProcessRecord::new(pid, name.clone(), name)
            .with_usage(
                0.0,
                parse_memory_usage(&fields[4], MemoryUnit::Kilobytes).unwrap_or(0),
            )
            .with_status(ProcessStatus::Running);
        processes.push(record);
    }

    processes
}

/// Split one CSV line, honoring double quotes.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() || !fields.is_empty() {
        fields.push(current);
    }

    fields
}
