//! Field-level normalization shared by every listing parser.

use crate::domain::ProcessStatus;
use crate::ports::HostPlatform;

/// Unit a memory figure is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
}

impl MemoryUnit {
    /// Parse a unit suffix. Case-insensitive, binary (1024) multiples.
    pub fn parse(suffix: &str) -> Option<Self> {
        match suffix.trim().to_lowercase().as_str() {
            "b" | "byte" | "bytes" => Some(MemoryUnit::Bytes),
            "k" | "kb" | "kib" | "kbytes" => Some(MemoryUnit::Kilobytes),
            "m" | "mb" | "mib" | "mbytes" => Some(MemoryUnit::Megabytes),
            "g" | "gb" | "gib" | "gbytes" => Some(MemoryUnit::Gigabytes),
            "t" | "tb" | "tib" | "tbytes" => Some(MemoryUnit::Terabytes),
            _ => None,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            MemoryUnit::Bytes => 1.0,
            MemoryUnit::Kilobytes => 1024.0,
            MemoryUnit::Megabytes => 1024.0 * 1024.0,
            MemoryUnit::Gigabytes => 1024.0 * 1024.0 * 1024.0,
            MemoryUnit::Terabytes => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        }
    }
}

/// Parse a memory figure such as `"20480"`, `"1.5 MB"` or `"45,000 K"` into bytes.
///
/// A bare number is read in `default_unit`. Unknown suffixes and negative or
/// non-numeric values yield `None`.
pub fn parse_memory_usage(input: &str, default_unit: MemoryUnit) -> Option<u64> {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    let split = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(cleaned.len());
    let (number, suffix) = cleaned.split_at(split);

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let unit = if suffix.trim().is_empty() {
        default_unit
    } else {
        MemoryUnit::parse(suffix)?
    };

    Some((value * unit.multiplier()).round() as u64)
}

/// Parse a CPU figure into percent.
///
/// Values strictly between 0 and 1 are fractions; everything else is already
/// a percentage. The result is clamped to [0, 100]; garbage reads as 0.
pub fn parse_cpu_usage(input: &str) -> f64 {
    let value: f64 = match input.trim().trim_end_matches('%').trim().parse() {
        Ok(v) => v,
        Err(_) => return 0.0,
    };
    if !value.is_finite() {
        return 0.0;
    }

    let percent = if value > 0.0 && value < 1.0 {
        value * 100.0
    } else {
        value
    };
    percent.clamp(0.0, 100.0)
}

/// Map a platform status code or word onto the canonical states.
pub fn parse_status(code: &str, platform: HostPlatform) -> ProcessStatus {
    let code = code.trim();
    match code.to_lowercase().as_str() {
        "running" => return ProcessStatus::Running,
        "sleeping" | "idle" => return ProcessStatus::Sleeping,
        "stopped" | "suspended" => return ProcessStatus::Stopped,
        "zombie" => return ProcessStatus::Zombie,
        _ => {}
    }

    let Some(first) = code.chars().next() else {
        return ProcessStatus::Unknown;
    };

    match platform {
        HostPlatform::Linux => match first {
            'R' => ProcessStatus::Running,
            'S' | 'D' | 'I' | 'W' => ProcessStatus::Sleeping,
            'T' | 't' => ProcessStatus::Stopped,
            'Z' => ProcessStatus::Zombie,
            _ => ProcessStatus::Unknown,
        },
        HostPlatform::MacOs => match first {
            'R' => ProcessStatus::Running,
            'S' | 'I' | 'U' => ProcessStatus::Sleeping,
            'T' => ProcessStatus::Stopped,
            'Z' => ProcessStatus::Zombie,
            _ => ProcessStatus::Unknown,
        },
        // tasklist /V reports words only
        HostPlatform::Windows => ProcessStatus::Unknown,
    }
}

/// Normalize a socket state token from ss, netstat or lsof.
///
/// Unknown tokens come back upper-cased.
pub fn normalize_connection_state(token: &str) -> String {
    let upper = token
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .to_uppercase();
    let canonical = match upper.as_str() {
        "ESTAB" => "ESTABLISHED",
        "UNCONN" | "LISTENING" => "LISTEN",
        "SYN-SENT" | "SYN_SENT" | "SYN_SEND" => "SYN_SENT",
        "SYN-RECV" | "SYN_RECV" | "SYN_RECEIVED" | "SYN-RECEIVED" => "SYN_RECV",
        "FIN-WAIT-1" | "FIN_WAIT1" | "FIN_WAIT_1" => "FIN_WAIT_1",
        "FIN-WAIT-2" | "FIN_WAIT2" | "FIN_WAIT_2" => "FIN_WAIT_2",
        "TIME-WAIT" => "TIME_WAIT",
        "CLOSE-WAIT" => "CLOSE_WAIT",
        "LAST-ACK" => "LAST_ACK",
        "CLOSED" => "CLOSE",
        _ => return upper.replace('-', "_"),
    };
    canonical.to_string()
}

/// Split `host:port` or `[ipv6]:port` at the last colon.
///
/// Brackets stay on the host. An empty host becomes `*`. Ports that are not
/// numeric (`*`) yield `None`.
pub fn parse_address(address: &str) -> Option<(String, u16)> {
    let address = address.trim();
    if address.starts_with('[') {
        let bracket_end = address.find(']')?;
        let rest = &address[bracket_end + 1..];
        let port_str = rest.strip_prefix(':')?;
        let port: u16 = port_str.parse().ok()?;
        Some((address[..=bracket_end].to_string(), port))
    } else {
        let last_colon = address.rfind(':')?;
        let host = &address[..last_colon];
        let port: u16 = address[last_colon + 1..].parse().ok()?;
        let host = if host.is_empty() { "*" } else { host };
        Some((host.to_string(), port))
    }
}

/// Parse a remote endpoint, dropping wildcard peers (`0.0.0.0:*`, `*:*`, port 0).
pub fn parse_remote(address: &str) -> (Option<String>, Option<u16>) {
    match parse_address(address) {
        Some((_, 0)) | None => (None, None),
        Some((host, port)) => (Some(host), Some(port)),
    }
}

/// Last path component of an executable, either separator.
pub fn executable_basename(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_usage() {
        assert_eq!(parse_memory_usage("512", MemoryUnit::Kilobytes), Some(524_288));
        assert_eq!(parse_memory_usage("1.5", MemoryUnit::Megabytes), Some(1_572_864));
        assert_eq!(parse_memory_usage("2 GB", MemoryUnit::Kilobytes), Some(2_147_483_648));
        assert_eq!(parse_memory_usage("45,000 K", MemoryUnit::Bytes), Some(46_080_000));
        assert_eq!(parse_memory_usage("100b", MemoryUnit::Kilobytes), Some(100));
        assert_eq!(parse_memory_usage("1KiB", MemoryUnit::Bytes), Some(1024));
        assert_eq!(parse_memory_usage("", MemoryUnit::Kilobytes), None);
        assert_eq!(parse_memory_usage("-5", MemoryUnit::Kilobytes), None);
        assert_eq!(parse_memory_usage("12 parsecs", MemoryUnit::Kilobytes), None);
    }

    #[test]
    fn test_parse_cpu_usage() {
        assert_eq!(parse_cpu_usage("0.25"), 25.0);
        assert_eq!(parse_cpu_usage("75.5"), 75.5);
        assert_eq!(parse_cpu_usage("150"), 100.0);
        assert_eq!(parse_cpu_usage("12.3%"), 12.3);
        assert_eq!(parse_cpu_usage("0"), 0.0);
        assert_eq!(parse_cpu_usage("1"), 1.0);
        assert_eq!(parse_cpu_usage("-3"), 0.0);
        assert_eq!(parse_cpu_usage("n/a"), 0.0);
    }

    #[test]
    fn test_parse_status_tables() {
        assert_eq!(parse_status("S", HostPlatform::Linux), ProcessStatus::Sleeping);
        assert_eq!(parse_status("Ssl", HostPlatform::Linux), ProcessStatus::Sleeping);
        assert_eq!(parse_status("R+", HostPlatform::Linux), ProcessStatus::Running);
        assert_eq!(parse_status("Z", HostPlatform::Linux), ProcessStatus::Zombie);
        assert_eq!(parse_status("T", HostPlatform::Linux), ProcessStatus::Stopped);
        assert_eq!(parse_status("U", HostPlatform::MacOs), ProcessStatus::Sleeping);
        assert_eq!(parse_status("U", HostPlatform::Linux), ProcessStatus::Unknown);
        assert_eq!(parse_status("Running", HostPlatform::Windows), ProcessStatus::Running);
        assert_eq!(parse_status("Suspended", HostPlatform::Windows), ProcessStatus::Stopped);
        assert_eq!(parse_status("?", HostPlatform::MacOs), ProcessStatus::Unknown);
        assert_eq!(parse_status("", HostPlatform::Linux), ProcessStatus::Unknown);
    }

    #[test]
    fn test_normalize_connection_state() {
        assert_eq!(normalize_connection_state("ESTAB"), "ESTABLISHED");
        assert_eq!(normalize_connection_state("SYN-SENT"), "SYN_SENT");
        assert_eq!(normalize_connection_state("UNCONN"), "LISTEN");
        assert_eq!(normalize_connection_state("LISTENING"), "LISTEN");
        assert_eq!(normalize_connection_state("(LISTEN)"), "LISTEN");
        assert_eq!(normalize_connection_state("time-wait"), "TIME_WAIT");
        assert_eq!(normalize_connection_state("Bound"), "BOUND");
        assert_eq!(normalize_connection_state("weird-one"), "WEIRD_ONE");
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("127.0.0.1:3000"), Some(("127.0.0.1".into(), 3000)));
        assert_eq!(parse_address("*:8080"), Some(("*".into(), 8080)));
        assert_eq!(parse_address("[::1]:3000"), Some(("[::1]".into(), 3000)));
        assert_eq!(parse_address(":::22"), Some(("::".into(), 22)));
        assert_eq!(parse_address("127.0.0.53%lo:53"), Some(("127.0.0.53%lo".into(), 53)));
        assert_eq!(parse_address("0.0.0.0:*"), None);
        assert_eq!(parse_address("[::1]3000"), None);
        assert_eq!(parse_address("nocolon"), None);
    }

    #[test]
    fn test_parse_remote_drops_wildcards() {
        assert_eq!(parse_remote("0.0.0.0:0"), (None, None));
        assert_eq!(parse_remote("*:*"), (None, None));
        assert_eq!(
            parse_remote("10.0.0.2:443"),
            (Some("10.0.0.2".into()), Some(443))
        );
    }

    #[test]
    fn test_executable_basename() {
        assert_eq!(executable_basename("/usr/bin/node"), "node");
        assert_eq!(executable_basename("C:\\Windows\\System32\\svchost.exe"), "svchost.exe");
        assert_eq!(executable_basename("node"), "node");
    }
}
