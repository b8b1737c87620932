//! Port scanning and conflict resolution.
//!
//! The scanner keeps a short-lived snapshot of the socket table and builds
//! three things on top of it:
//! - the deduplicated active-port listing
//! - free-port search
//! - the kill → verify → execute resolution workflow

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::process_manager::ProcessManager;
use super::recovery::{nearby_ports, BoxFuture, ErrorRecoveryManager, RecoveryOptions, RecoverySource};
use crate::adapters::executor::CommandExecutor;
use crate::adapters::platform::occupies;
use crate::config::{Config, ResolutionConfig, ScanConfig};
use crate::domain::{
    ensure_port, validate_port_range, NetworkConnection, PortRecord, ProcessRecord, Protocol,
    ResolveOutcome, Signal,
};
use crate::error::{Error, Result};
use crate::ports::PlatformAdapter;

/// Filters for [`PortScanner::get_active_ports`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOptions {
    pub protocol: Option<Protocol>,
    /// Inclusive port range.
    pub port_range: Option<(u16, u16)>,
    /// Look up the owning process of each port.
    pub include_process: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            protocol: None,
            port_range: None,
            include_process: true,
        }
    }
}

impl ScanOptions {
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn range(mut self, start: u16, end: u16) -> Self {
        self.port_range = Some((start, end));
        self
    }

    pub fn without_process(mut self) -> Self {
        self.include_process = false;
        self
    }
}

/// Options for [`PortScanner::resolve_conflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Kill with SIGKILL from the first attempt.
    pub force: bool,
    /// Time budget for the replacement command.
    pub timeout: Duration,
    /// Protocol the port must be free for.
    pub protocol: Protocol,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            force: false,
            timeout: Duration::from_millis(30_000),
            protocol: Protocol::Tcp,
        }
    }
}

/// Connection cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub connections: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub ttl_ms: u64,
}

struct CacheEntry {
    connections: Vec<NetworkConnection>,
    fetched_at: Instant,
    timestamp: DateTime<Utc>,
}

struct ConnectionCache {
    ttl: Duration,
    entry: Option<CacheEntry>,
}

/// Conflict-resolution engine.
pub struct PortScanner<A: PlatformAdapter> {
    adapter: A,
    processes: ProcessManager<A>,
    executor: Arc<CommandExecutor>,
    recovery: Arc<ErrorRecoveryManager>,
    resolution: ResolutionConfig,
    scan: ScanConfig,
    cache: RwLock<ConnectionCache>,
    port_locks: Mutex<HashMap<u16, Arc<tokio::sync::Mutex<()>>>>,
}

impl<A: PlatformAdapter + Clone + 'static> PortScanner<A> {
    pub fn new(
        adapter: A,
        executor: Arc<CommandExecutor>,
        recovery: Arc<ErrorRecoveryManager>,
        config: &Config,
    ) -> Self {
        Self {
            processes: ProcessManager::new(adapter.clone(), Arc::clone(&recovery)),
            adapter,
            executor,
            recovery,
            resolution: config.resolution.clone(),
            scan: config.scan.clone(),
            cache: RwLock::new(ConnectionCache {
                ttl: Duration::from_millis(config.cache.ttl_ms),
                entry: None,
            }),
            port_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn processes(&self) -> &ProcessManager<A> {
        &self.processes
    }

    // ========================================================================
    // Connection cache
    // ========================================================================

    pub fn set_cache_ttl(&self, ttl: Duration) {
        self.cache.write().ttl = ttl;
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.read().ttl
    }

    pub fn clear_cache(&self) {
        self.cache.write().entry = None;
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        let cache = self.cache.read();
        let timestamp = cache.entry.as_ref().map(|e| e.timestamp);
        CacheStats {
            entries: usize::from(cache.entry.is_some()),
            connections: cache.entry.as_ref().map_or(0, |e| e.connections.len()),
            oldest: timestamp,
            newest: timestamp,
            ttl_ms: cache.ttl.as_millis() as u64,
        }
    }

    fn cached_connections(&self) -> Option<Vec<NetworkConnection>> {
        let cache = self.cache.read();
        cache
            .entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < cache.ttl)
            .map(|e| e.connections.clone())
    }

    /// Socket table, served from the cache while it is fresh.
    async fn connections(&self) -> Result<Vec<NetworkConnection>> {
        self.snapshot(true).await
    }

    /// Degraded (empty) results are returned when `degrade` allows, but
    /// never cached.
    async fn snapshot(&self, degrade: bool) -> Result<Vec<NetworkConnection>> {
        if let Some(connections) = self.cached_connections() {
            return Ok(connections);
        }

        let options = RecoveryOptions {
            degrade,
            ..RecoveryOptions::default()
        };
        let outcome = self
            .recovery
            .recover(
                "scanner.connections",
                || self.adapter.get_network_connections(),
                None,
                options,
            )
            .await?;

        if outcome.source != RecoverySource::Degraded {
            debug!(count = outcome.value.len(), "Caching connection snapshot");
            self.cache.write().entry = Some(CacheEntry {
                connections: outcome.value.clone(),
                fetched_at: Instant::now(),
                timestamp: Utc::now(),
            });
        }
        Ok(outcome.value)
    }

    // ========================================================================
    // Active ports
    // ========================================================================

    /// One record per (port, protocol), sorted by port then protocol.
    ///
    /// When several sockets share a port, the record carrying process info
    /// wins.
    pub async fn get_active_ports(&self, options: &ScanOptions) -> Result<Vec<PortRecord>> {
        if let Some((start, end)) = options.port_range {
            validate_port_range(start, end)?;
        }

        let connections: Vec<NetworkConnection> = self
            .connections()
            .await?
            .into_iter()
            .filter(|c| options.protocol.map_or(true, |p| c.protocol == p))
            .filter(|c| {
                options
                    .port_range
                    .map_or(true, |(start, end)| (start..=end).contains(&c.local_port))
            })
            .collect();

        let owners = if options.include_process {
            let pids: Vec<u32> = connections
                .iter()
                .filter_map(|c| c.pid)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            self.lookup_processes(pids).await
        } else {
            HashMap::new()
        };

        let mut records: BTreeMap<(u16, Protocol), PortRecord> = BTreeMap::new();
        for connection in &connections {
            let process = if options.include_process {
                connection
                    .pid
                    .and_then(|pid| owners.get(&pid).cloned().or_else(|| named_owner(connection)))
            } else {
                None
            };
            let record = PortRecord::from_connection(connection, process);
            let key = (record.port, record.protocol);
            let replace = records
                .get(&key)
                .map_or(true, |existing| !existing.has_process() && record.has_process());
            if replace {
                records.insert(key, record);
            }
        }

        Ok(records.into_values().collect())
    }

    /// Look up processes in fixed-size concurrent batches.
    async fn lookup_processes(&self, pids: Vec<u32>) -> HashMap<u32, ProcessRecord> {
        let mut found = HashMap::new();
        let batch_size = self.scan.lookup_batch_size.max(1);

        for batch in pids.chunks(batch_size) {
            let mut set = JoinSet::new();
            for &pid in batch {
                let adapter = self.adapter.clone();
                set.spawn(async move { (pid, adapter.get_process_info(pid).await) });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((pid, Ok(Some(process)))) => {
                        found.insert(pid, process);
                    }
                    Ok((pid, Ok(None))) => debug!(pid = pid, "Process exited before lookup"),
                    Ok((pid, Err(e))) => debug!(pid = pid, error = %e, "Process lookup failed"),
                    Err(e) => warn!(error = %e, "Process lookup task failed"),
                }
            }
        }
        found
    }

    // ========================================================================
    // Free ports
    // ========================================================================

    /// Lowest port in `start..=end` that is free for `protocol`.
    ///
    /// Ports missing from the snapshot are confirmed with the adapter's
    /// availability check, which falls back to a bind check only when its
    /// tools cannot answer.
    pub async fn find_free_port(&self, start: u16, end: u16, protocol: Protocol) -> Result<u16> {
        validate_port_range(start, end)?;
        let active = self.occupied_ports(protocol).await;

        let candidates: Vec<u16> = (start..=end).filter(|p| !active.contains(p)).collect();
        for batch in candidates.chunks(self.scan.port_batch_size.max(1)) {
            if let Some(&port) = self.available_in(batch, protocol).await.first() {
                info!(port = port, protocol = %protocol, "Found free port");
                return Ok(port);
            }
        }

        Err(Error::NoFreePort { start, end })
    }

    /// Up to `count` free ports above `port`.
    ///
    /// Falls back to the nearest candidates, unchecked, when scanning fails.
    pub async fn suggest_alternative_ports(&self, port: u16, count: usize) -> Result<Vec<u16>> {
        ensure_port(port)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let fallback: BoxFuture<'_, Vec<u16>> =
            Box::pin(async move { Ok::<_, Error>(nearby_ports(port, count)) });
        self.recovery
            .execute_with_recovery(
                "scanner.suggest_ports",
                || self.free_ports_after(port, count),
                Some(fallback),
                RecoveryOptions::default().for_port(port),
            )
            .await
    }

    async fn free_ports_after(&self, port: u16, count: usize) -> Result<Vec<u16>> {
        let protocol = Protocol::Tcp;
        let active: HashSet<u16> = self
            .snapshot(false)
            .await?
            .iter()
            .filter(|c| occupies(c, c.local_port, protocol))
            .map(|c| c.local_port)
            .collect();

        let candidates: Vec<u16> = (u32::from(port) + 1..=u32::from(u16::MAX))
            .filter_map(|p| u16::try_from(p).ok())
            .filter(|p| !active.contains(p))
            .collect();

        let mut free = Vec::with_capacity(count);
        for batch in candidates.chunks(self.scan.port_batch_size.max(1)) {
            for candidate in self.available_in(batch, protocol).await {
                free.push(candidate);
                if free.len() == count {
                    return Ok(free);
                }
            }
        }
        Ok(free)
    }

    /// Ports held for `protocol` according to the snapshot.
    ///
    /// A failed scan yields an empty set; every candidate is still checked.
    async fn occupied_ports(&self, protocol: Protocol) -> HashSet<u16> {
        match self.connections().await {
            Ok(connections) => connections
                .iter()
                .filter(|c| occupies(c, c.local_port, protocol))
                .map(|c| c.local_port)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Connection scan failed, checking every candidate");
                HashSet::new()
            }
        }
    }

    /// The ports in `batch` the adapter reports free, ascending.
    async fn available_in(&self, batch: &[u16], protocol: Protocol) -> Vec<u16> {
        let mut set = JoinSet::new();
        for &port in batch {
            let adapter = self.adapter.clone();
            set.spawn(async move { (port, adapter.is_port_available(port, protocol).await) });
        }

        let mut available = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((port, true)) => available.push(port),
                Ok((_, false)) => {}
                Err(e) => warn!(error = %e, "Port check task failed"),
            }
        }
        available.sort_unstable();
        available
    }

    // ========================================================================
    // Conflict resolution
    // ========================================================================

    /// Free `port` and run `command` in its place.
    ///
    /// Resolutions on the same port run one at a time. Step failures are
    /// reported in the outcome; only invalid input is an `Err`.
    pub async fn resolve_conflict(
        &self,
        port: u16,
        command: &str,
        options: ResolveOptions,
    ) -> Result<ResolveOutcome> {
        ensure_port(port)?;
        let command = command.trim();
        if command.is_empty() {
            return Err(Error::Validation("Command must not be empty".to_string()));
        }

        let lock = self.port_lock(port);
        let _guard = lock.lock().await;

        let started = Instant::now();
        let mut outcome = ResolveOutcome::started(port, command);
        info!(id = %outcome.id, port = port, command = command, "Resolving port conflict");

        // Discover
        let targets = self.discover(port, options.protocol).await;
        debug!(port = port, count = targets.len(), "Discovered port occupants");

        // Kill
        for process in targets {
            if let Err(e) = self.kill_with_retry(&process, options.force).await {
                warn!(port = port, pid = process.pid, error = %e, "Could not free port");
                outcome.error = Some(format!(
                    "Failed to kill process {} ({}): {}",
                    process.pid, process.name, e
                ));
                return Ok(finish(outcome, started));
            }
            info!(port = port, pid = process.pid, name = %process.name, "Killed port occupant");
            outcome.killed_processes.push(process);
        }

        // Verify
        if !self.wait_for_port_free(port, options.protocol).await {
            warn!(port = port, "Port still in use after kill");
            outcome.error = Some(Error::PortNotAvailable { port }.to_string());
            return Ok(finish(outcome, started));
        }

        // Execute
        match self.executor.execute_shell(command, options.timeout).await {
            Ok(result) => {
                outcome.command_executed = true;
                outcome.command_output = Some(result.stdout.clone());
                if result.success() {
                    outcome.success = true;
                } else {
                    outcome.error = Some(format!(
                        "Command exited with code {:?}: {}",
                        result.exit_code,
                        result.stderr.trim()
                    ));
                }
            }
            Err(e) => {
                outcome.command_executed = matches!(e, Error::Timeout { .. });
                outcome.error = Some(e.to_string());
            }
        }

        let outcome = finish(outcome, started);
        info!(
            id = %outcome.id,
            port = port,
            success = outcome.success,
            duration_ms = outcome.duration_ms,
            "Port conflict resolution finished"
        );
        Ok(outcome)
    }

    fn port_lock(&self, port: u16) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.port_locks.lock().entry(port).or_default())
    }

    /// Union of the snapshot's owners and a direct lookup, deduplicated.
    async fn discover(&self, port: u16, protocol: Protocol) -> Vec<ProcessRecord> {
        let mut targets: Vec<ProcessRecord> = Vec::new();

        match self.connections().await {
            Ok(connections) => {
                let mut pids = Vec::new();
                for connection in connections.iter().filter(|c| occupies(c, port, protocol)) {
                    if let Some(pid) = connection.pid {
                        if !pids.contains(&pid) {
                            pids.push(pid);
                        }
                    }
                }
                let owners = self.lookup_processes(pids.clone()).await;
                for pid in pids {
                    let process = owners.get(&pid).cloned().or_else(|| {
                        connections
                            .iter()
                            .find(|c| c.pid == Some(pid))
                            .and_then(named_owner)
                    });
                    targets.push(process.unwrap_or_else(|| ProcessRecord::new(pid, "unknown", "")));
                }
            }
            Err(e) => warn!(port = port, error = %e, "Snapshot discovery failed"),
        }

        match self.processes.find_by_port(port).await {
            Ok(Some(process)) if !targets.iter().any(|t| t.pid == process.pid) => {
                targets.push(process)
            }
            Ok(_) => {}
            Err(e) => warn!(port = port, error = %e, "Direct lookup failed"),
        }

        targets
    }

    /// Signal `process` until it exits, escalating on the last attempt
    /// when configured.
    async fn kill_with_retry(&self, process: &ProcessRecord, force: bool) -> Result<()> {
        let attempts = self.resolution.kill_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let escalate = self.resolution.escalate_final_attempt && attempt == attempts;
            let signal = Signal::for_force(force || escalate);
            if escalate && !force {
                debug!(pid = process.pid, "Escalating to SIGKILL on final attempt");
            }

            match self.adapter.kill_process(process.pid, signal).await {
                Ok(_) => {
                    if self.wait_for_exit(process.pid).await {
                        return Ok(());
                    }
                    debug!(pid = process.pid, attempt = attempt, "Process still running after signal");
                    last_error = Some(Error::Timeout {
                        operation: format!("waiting for process {} to exit", process.pid),
                        after: Duration::from_millis(self.resolution.exit_poll_timeout_ms),
                    });
                }
                // already gone
                Err(Error::ProcessNotFound(_)) => return Ok(()),
                Err(e) => {
                    debug!(pid = process.pid, attempt = attempt, error = %e, "Kill attempt failed");
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                sleep(Duration::from_millis(
                    self.resolution.kill_retry_delay_ms * u64::from(attempt),
                ))
                .await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::SystemCallFailed(format!("could not kill process {}", process.pid))
        }))
    }

    /// Poll until `pid` is gone. `false` on timeout.
    async fn wait_for_exit(&self, pid: u32) -> bool {
        let interval = Duration::from_millis(self.resolution.exit_poll_interval_ms.max(1));
        let deadline = Instant::now() + Duration::from_millis(self.resolution.exit_poll_timeout_ms);
        loop {
            if !self.adapter.is_process_running(pid).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(interval).await;
        }
    }

    /// Re-check availability on a fresh snapshot until it holds.
    async fn wait_for_port_free(&self, port: u16, protocol: Protocol) -> bool {
        self.clear_cache();
        let interval = Duration::from_millis(self.resolution.verify_interval_ms);
        let attempts = self.resolution.verify_attempts.max(1);
        for attempt in 1..=attempts {
            if self.adapter.is_port_available(port, protocol).await {
                debug!(port = port, attempt = attempt, "Port verified free");
                return true;
            }
            if attempt < attempts {
                sleep(interval).await;
            }
        }
        false
    }
}

fn named_owner(connection: &NetworkConnection) -> Option<ProcessRecord> {
    let pid = connection.pid?;
    let name = connection.process_name.clone()?;
    Some(ProcessRecord::new(pid, name.clone(), name))
}

fn finish(mut outcome: ResolveOutcome, started: Instant) -> ResolveOutcome {
    outcome.duration_ms = started.elapsed().as_millis() as u64;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAdapter;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.recovery.base_delay_ms = 1;
        config.resolution = ResolutionConfig {
            kill_attempts: 3,
            kill_retry_delay_ms: 5,
            exit_poll_interval_ms: 5,
            exit_poll_timeout_ms: 30,
            verify_attempts: 3,
            verify_interval_ms: 5,
            escalate_final_attempt: true,
        };
        config
    }

    fn scanner_with(adapter: MockAdapter, config: &Config) -> PortScanner<MockAdapter> {
        let recovery = Arc::new(ErrorRecoveryManager::new(
            config.recovery.clone(),
            config.circuit_breaker.clone(),
        ));
        let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
        PortScanner::new(adapter, executor, recovery, config)
    }

    fn scanner(adapter: MockAdapter) -> PortScanner<MockAdapter> {
        scanner_with(adapter, &fast_config())
    }

    #[tokio::test]
    async fn test_find_free_port_skips_occupied() {
        let adapter = MockAdapter::new()
            .with_listener(3000, 1, "a")
            .with_listener(3001, 2, "b")
            .with_listener(3002, 3, "c")
            .with_listener(3003, 4, "d");
        let port = scanner(adapter)
            .find_free_port(3000, 3010, Protocol::Tcp)
            .await
            .unwrap();
        assert_eq!(port, 3004);
    }

    #[tokio::test]
    async fn test_find_free_port_single_port_range() {
        let adapter = MockAdapter::new().with_listener(3000, 1, "a");
        let scanner = scanner(adapter);

        let err = scanner.find_free_port(3000, 3000, Protocol::Tcp).await.unwrap_err();
        assert_eq!(err.code(), "NO_FREE_PORT");

        let free = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert_eq!(scanner.find_free_port(free, free, Protocol::Tcp).await.unwrap(), free);

        assert!(scanner.find_free_port(10, 5, Protocol::Tcp).await.is_err());
    }

    #[tokio::test]
    async fn test_find_free_port_trusts_adapter_for_privileged_ports() {
        // binding 80 needs privileges the caller may lack; the adapter's
        // table is the authority
        let scanner = scanner(MockAdapter::new().with_listener(81, 1, "nginx"));
        assert_eq!(scanner.find_free_port(80, 81, Protocol::Tcp).await.unwrap(), 80);

        let err = scanner.find_free_port(81, 81, Protocol::Tcp).await.unwrap_err();
        assert_eq!(err.code(), "NO_FREE_PORT");
    }

    #[tokio::test]
    async fn test_active_ports_dedupe_prefers_process_info() {
        let adapter = MockAdapter::new().with_listener(3000, 42, "node");
        {
            let mut state = adapter.state();
            state
                .connections
                .insert(0, NetworkConnection::listening(Protocol::Tcp, "::", 3000, None));
            state
                .connections
                .push(NetworkConnection::listening(Protocol::Udp, "*", 3000, None));
            state
                .connections
                .push(NetworkConnection::listening(Protocol::Tcp, "*", 80, None));
        }
        let scanner = scanner(adapter);

        let records = scanner.get_active_ports(&ScanOptions::default()).await.unwrap();
        let keys: Vec<(u16, Protocol)> = records.iter().map(|r| (r.port, r.protocol)).collect();
        assert_eq!(
            keys,
            vec![(80, Protocol::Tcp), (3000, Protocol::Tcp), (3000, Protocol::Udp)]
        );
        assert_eq!(records[1].process.as_ref().unwrap().pid, 42);

        let udp = scanner
            .get_active_ports(&ScanOptions::default().protocol(Protocol::Udp))
            .await
            .unwrap();
        assert_eq!(udp.len(), 1);

        let ranged = scanner
            .get_active_ports(&ScanOptions::default().range(1000, 4000).without_process())
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);
        assert!(ranged.iter().all(|r| r.process.is_none()));
    }

    #[tokio::test]
    async fn test_connection_cache() {
        let adapter = MockAdapter::new().with_listener(3000, 42, "node");
        let scanner = scanner(adapter.clone());
        assert_eq!(scanner.get_cache_stats().entries, 0);

        scanner.get_active_ports(&ScanOptions::default()).await.unwrap();
        scanner.get_active_ports(&ScanOptions::default()).await.unwrap();
        assert_eq!(adapter.state().scan_calls, 1);

        let stats = scanner.get_cache_stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.ttl_ms, 5_000);
        assert!(stats.oldest.is_some());

        scanner.clear_cache();
        scanner.get_active_ports(&ScanOptions::default()).await.unwrap();
        assert_eq!(adapter.state().scan_calls, 2);

        scanner.set_cache_ttl(Duration::ZERO);
        scanner.get_active_ports(&ScanOptions::default()).await.unwrap();
        assert_eq!(adapter.state().scan_calls, 3);
    }

    #[tokio::test]
    async fn test_degraded_scan_is_not_cached() {
        let adapter = MockAdapter::new().with_listener(3000, 42, "node");
        adapter.state().failing_scans = 3;
        let scanner = scanner(adapter.clone());

        let records = scanner.get_active_ports(&ScanOptions::default()).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(scanner.get_cache_stats().entries, 0);

        let records = scanner.get_active_ports(&ScanOptions::default()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_conflict_success() {
        let adapter = MockAdapter::new().with_listener(8080, 100, "node");
        let scanner = scanner(adapter.clone());

        let outcome = scanner
            .resolve_conflict(8080, "echo ok", ResolveOptions::default())
            .await
            .unwrap();

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.killed_processes.len(), 1);
        assert_eq!(outcome.killed_processes[0].pid, 100);
        assert!(outcome.command_executed);
        assert!(outcome.command_output.as_deref().unwrap().contains("ok"));
        assert_eq!(adapter.state().kill_calls, vec![(100, Signal::Term)]);
    }

    #[tokio::test]
    async fn test_resolve_escalates_on_final_attempt() {
        let adapter = MockAdapter::new().with_listener(8081, 200, "stubborn");
        adapter.state().ignore_term.insert(200);
        let scanner = scanner(adapter.clone());

        let outcome = scanner
            .resolve_conflict(8081, "echo ok", ResolveOptions::default())
            .await
            .unwrap();

        assert!(outcome.success);
        let signals: Vec<Signal> = adapter.state().kill_calls.iter().map(|(_, s)| *s).collect();
        assert_eq!(signals, vec![Signal::Term, Signal::Term, Signal::Kill]);
    }

    #[tokio::test]
    async fn test_resolve_without_escalation_gives_up() {
        let adapter = MockAdapter::new().with_listener(8082, 200, "stubborn");
        adapter.state().ignore_term.insert(200);
        let mut config = fast_config();
        config.resolution.escalate_final_attempt = false;
        let scanner = scanner_with(adapter.clone(), &config);

        let outcome = scanner
            .resolve_conflict(8082, "echo ok", ResolveOptions::default())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(!outcome.command_executed);
        assert!(outcome.killed_processes.is_empty());
        assert!(outcome.error.as_deref().unwrap().contains("200"));
        assert_eq!(adapter.state().kill_calls.len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_aborts_keeping_partial_kills() {
        let adapter = MockAdapter::new()
            .with_listener(9000, 1, "worker")
            .with_listener(9000, 2, "root-owned");
        adapter.state().unkillable.insert(2);
        let scanner = scanner(adapter);

        let outcome = scanner
            .resolve_conflict(9000, "echo ok", ResolveOptions { force: true, ..ResolveOptions::default() })
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.killed_processes.len(), 1);
        assert_eq!(outcome.killed_processes[0].pid, 1);
        assert!(outcome.error.as_deref().unwrap().contains("root-owned"));
        assert!(!outcome.command_executed);
    }

    #[tokio::test]
    async fn test_resolve_fails_verification() {
        let adapter = MockAdapter::new();
        adapter
            .state()
            .connections
            .push(NetworkConnection::listening(Protocol::Tcp, "*", 9100, None));
        let scanner = scanner(adapter);

        let outcome = scanner
            .resolve_conflict(9100, "echo ok", ResolveOptions::default())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.killed_processes.is_empty());
        assert!(outcome.error.as_deref().unwrap().contains("9100"));
        assert!(!outcome.command_executed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_command_failure_keeps_output() {
        let scanner = scanner(MockAdapter::new());

        let outcome = scanner
            .resolve_conflict(9200, "echo partial; exit 3", ResolveOptions::default())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.command_executed);
        assert!(outcome.command_output.as_deref().unwrap().contains("partial"));
        assert!(outcome.error.as_deref().unwrap().contains("3"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_input() {
        let scanner = scanner(MockAdapter::new());
        assert!(scanner.resolve_conflict(0, "echo ok", ResolveOptions::default()).await.is_err());
        assert!(scanner.resolve_conflict(80, "  ", ResolveOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_resolutions_on_one_port_are_serialized() {
        let adapter = MockAdapter::new().with_listener(8090, 300, "node");
        let scanner = scanner(adapter.clone());

        let (first, second) = tokio::join!(
            scanner.resolve_conflict(8090, "echo one", ResolveOptions::default()),
            scanner.resolve_conflict(8090, "echo two", ResolveOptions::default()),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(first.success && second.success);
        assert_eq!(
            first.killed_processes.len() + second.killed_processes.len(),
            1
        );
        assert_eq!(adapter.state().kill_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_suggest_alternative_ports() {
        let adapter = MockAdapter::new()
            .with_listener(3001, 1, "a")
            .with_listener(3002, 2, "b");
        let scanner = scanner(adapter.clone());

        let ports = scanner.suggest_alternative_ports(3000, 3).await.unwrap();
        assert_eq!(ports, vec![3003, 3004, 3005]);
        assert!(scanner.suggest_alternative_ports(3000, 0).await.unwrap().is_empty());

        scanner.clear_cache();
        adapter.state().failing_scans = usize::MAX;
        let ports = scanner.suggest_alternative_ports(3000, 3).await.unwrap();
        assert_eq!(ports, vec![3001, 3002, 3003]);
    }
}
