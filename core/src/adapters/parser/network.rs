//! Socket table parsers (ss, netstat, lsof).

use std::sync::OnceLock;

use regex::Regex;

use super::units::{normalize_connection_state, parse_address, parse_remote};
use crate::domain::{NetworkConnection, Protocol};

/// Socket listing formats the parsers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFormat {
    Ss,
    Netstat,
    Lsof,
}

/// `users:(("node",pid=1234,fd=23))` owner column of `ss -p`.
fn ss_owner_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(r#"users:\(\("(.+?)",pid=(\d+),fd=(\d+)\)"#).ok())
        .as_ref()
}

/// State for rows whose tool omits it (UDP): bound with no peer means listening.
fn implicit_state(remote_port: Option<u16>) -> String {
    if remote_port.is_some() {
        "ESTABLISHED".to_string()
    } else {
        "LISTEN".to_string()
    }
}

/// Parse `ss -tulnp`.
///
/// ```text
/// Netid State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process
/// tcp   LISTEN 0      511    127.0.0.1:3000     0.0.0.0:*         users:(("node",pid=1234,fd=23))
/// udp   UNCONN 0      0      0.0.0.0:5353       0.0.0.0:*
/// ```
pub fn parse_ss(output: &str) -> Vec<NetworkConnection> {
    parse_ss_as(output, Protocol::Tcp)
}

/// Parse `ss` output, attributing rows without a Netid column to `listed`.
///
/// `ss -tln` and `ss -uln` list a single socket type and drop the Netid
/// column, so the protocol has to come from the flag that was passed.
pub fn parse_ss_as(output: &str, listed: Protocol) -> Vec<NetworkConnection> {
    let mut connections = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() || parts[0] == "Netid" || parts[0] == "State" {
            continue;
        }

        let (protocol, rest) = match Protocol::parse(parts[0]) {
            Some(protocol) => (protocol, &parts[1..]),
            None => (listed, &parts[..]),
        };
        if rest.len() < 5 {
            continue;
        }

        let Some((local_address, local_port)) = parse_address(rest[3]) else {
            continue;
        };
        if local_port == 0 {
            continue;
        }
        let (remote_address, remote_port) = parse_remote(rest[4]);

        let owner = rest[5..].join(" ");
        let (pid, process_name) = match ss_owner_regex().and_then(|re| re.captures(&owner)) {
            Some(caps) => (caps[2].parse().ok(), Some(caps[1].to_string())),
            None => (None, None),
        };

        connections.push(NetworkConnection {
            local_address,
            local_port,
            remote_address,
            remote_port,
            protocol,
            state: normalize_connection_state(rest[0]),
            pid,
            process_name,
        });
    }

    connections
}

/// Parse netstat output in either the Linux or the Windows layout.
///
/// ```text
/// Proto Recv-Q Send-Q Local Address    Foreign Address  State   PID/Program name
/// tcp        0      0 0.0.0.0:22       0.0.0.0:*        LISTEN  812/sshd
/// udp        0      0 0.0.0.0:68       0.0.0.0:*                789/dhclient
///
///   Proto  Local Address          Foreign Address        State           PID
///   TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1020
///   UDP    0.0.0.0:500            *:*                                    4420
/// ```
pub fn parse_netstat(output: &str) -> Vec<NetworkConnection> {
    let mut connections = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let Some(protocol) = Protocol::parse(parts[0]) else {
            continue;
        };

        // Windows puts the local address right after Proto; Linux has queues first.
        let local_index = if parts[1].contains(':') { 1 } else { 3 };
        if parts.len() < local_index + 2 {
            continue;
        }

        let Some((local_address, local_port)) = parse_address(parts[local_index]) else {
            continue;
        };
        if local_port == 0 {
            continue;
        }
        let (remote_address, remote_port) = parse_remote(parts[local_index + 1]);

        let tail = &parts[local_index + 2..];
        let (state, owner) = match tail {
            [] => (None, None),
            [only] if is_owner_column(only) => (None, Some(*only)),
            [only] => (Some(*only), None),
            [state, owner, ..] => (Some(*state), Some(*owner)),
        };

        let (pid, process_name) = owner.map(parse_owner_column).unwrap_or((None, None));
        let state = match state {
            Some(token) => normalize_connection_state(token),
            None => implicit_state(remote_port),
        };

        connections.push(NetworkConnection {
            local_address,
            local_port,
            remote_address,
            remote_port,
            protocol,
            state,
            pid,
            process_name,
        });
    }

    connections
}

fn is_owner_column(token: &str) -> bool {
    token == "-" || token.contains('/') || token.chars().all(|c| c.is_ascii_digit())
}

/// `812/sshd`, `4420` or `-`.
fn parse_owner_column(token: &str) -> (Option<u32>, Option<String>) {
    match token.split_once('/') {
        Some((pid, name)) => (pid.parse().ok(), Some(name.to_string()).filter(|n| !n.is_empty())),
        None => (token.parse().ok(), None),
    }
}

/// Parse `lsof -i -P -n`.
///
/// ```text
/// COMMAND  PID USER FD  TYPE DEVICE             SIZE/OFF NODE NAME
/// node    1234 dev  23u IPv4 0x1a2b3c4d5e6f7a8b 0t0      TCP  *:3000 (LISTEN)
/// node    1234 dev  24u IPv6 0x1a2b3c4d5e6f7a8c 0t0      TCP  [::1]:3000->[::1]:52000 (ESTABLISHED)
/// ```
pub fn parse_lsof(output: &str) -> Vec<NetworkConnection> {
    let mut connections = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 9 || parts[0] == "COMMAND" {
            continue;
        }
        let Ok(pid) = parts[1].parse::<u32>() else {
            continue;
        };

        let Some(node_index) = parts
            .iter()
            .skip(4)
            .position(|p| *p == "TCP" || *p == "UDP")
            .map(|i| i + 4)
        else {
            continue;
        };
        let Some(name) = parts.get(node_index + 1) else {
            continue;
        };
        let Some(protocol) = Protocol::parse(parts[node_index]) else {
            continue;
        };

        let (local, remote) = match name.split_once("->") {
            Some((local, remote)) => (local, Some(remote)),
            None => (*name, None),
        };
        let Some((local_address, local_port)) = parse_address(local) else {
            continue;
        };
        if local_port == 0 {
            continue;
        }
        let (remote_address, remote_port) = remote.map(parse_remote).unwrap_or((None, None));

        let state = match parts.get(node_index + 2) {
            Some(token) => normalize_connection_state(token),
            None => implicit_state(remote_port),
        };

        connections.push(NetworkConnection {
            local_address,
            local_port,
            remote_address,
            remote_port,
            protocol,
            state,
            pid: Some(pid),
            process_name: Some(parts[0].replace("\\x20", " ")),
        });
    }

    connections
}

/// Parse `lsof -t` output: one PID per line.
pub fn parse_pid_list(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .filter(|pid| *pid > 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Guess which tool produced `output` from its header line.
pub fn detect_network_format(output: &str) -> Option<NetworkFormat> {
    for line in output.lines().take(5) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.contains(&"COMMAND") && parts.contains(&"PID") && parts.contains(&"TYPE") {
            return Some(NetworkFormat::Lsof);
        }
        if matches!(parts.first(), Some(&"Netid") | Some(&"State")) {
            return Some(NetworkFormat::Ss);
        }
        if parts.contains(&"Proto") {
            return Some(NetworkFormat::Netstat);
        }
    }
    None
}

/// Parse a socket listing of unknown origin.
///
/// Without a recognizable header every parser runs and the one yielding the
/// most records wins.
pub fn parse_network_output(output: &str) -> Vec<NetworkConnection> {
    match detect_network_format(output) {
        Some(NetworkFormat::Ss) => parse_ss(output),
        Some(NetworkFormat::Netstat) => parse_netstat(output),
        Some(NetworkFormat::Lsof) => parse_lsof(output),
        None => [parse_ss(output), parse_netstat(output), parse_lsof(output)]
            .into_iter()
            .max_by_key(Vec::len)
            .unwrap_or_default(),
    }
}
