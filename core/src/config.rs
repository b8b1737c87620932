//! Configuration management for timeouts, caches and recovery policy.
//!
//! Stores configuration in JSON format at `~/.procport/config.json`.
//! Every field has a default, so a partial or missing file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

/// Subprocess execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    /// Time a command may run before it is terminated.
    pub timeout_ms: u64,
    /// Wait between the terminate signal and the forced kill.
    pub kill_grace_ms: u64,
    /// Arguments are truncated to this many characters.
    pub max_arg_length: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            kill_grace_ms: 5_000,
            max_arg_length: 1_000,
            retry_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Connection snapshot cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 5_000 }
    }
}

/// Retry policy used by the error recovery manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Scale delays by the operation's historical success rate.
    pub adaptive: bool,
    /// Simultaneous recoveries allowed before callers are turned away.
    pub max_concurrent: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
            adaptive: true,
            max_concurrent: 10,
        }
    }
}

impl RecoveryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Timing of the kill → verify → execute workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolutionConfig {
    pub kill_attempts: u32,
    /// Multiplied by the attempt number between kill attempts.
    pub kill_retry_delay_ms: u64,
    pub exit_poll_interval_ms: u64,
    pub exit_poll_timeout_ms: u64,
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    /// Send SIGKILL on the last kill attempt even when a graceful kill was asked for.
    pub escalate_final_attempt: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            kill_attempts: 3,
            kill_retry_delay_ms: 1_000,
            exit_poll_interval_ms: 100,
            exit_poll_timeout_ms: 2_000,
            verify_attempts: 10,
            verify_interval_ms: 500,
            escalate_final_attempt: true,
        }
    }
}

/// Batch sizes for scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    /// Concurrent PID lookups per batch.
    pub lookup_batch_size: usize,
    /// Candidate ports examined per batch in free-port searches.
    pub port_batch_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            lookup_batch_size: 50,
            port_batch_size: 100,
        }
    }
}

impl Config {
    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| -> Result<()> {
            Err(Error::Config(format!("{} {}", field, reason)))
        };

        if self.executor.timeout_ms == 0 {
            return invalid("executor.timeoutMs", "must be positive");
        }
        if self.recovery.max_attempts == 0 {
            return invalid("recovery.maxAttempts", "must be at least 1");
        }
        let multiplier = self.recovery.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return invalid("recovery.backoffMultiplier", "must be at least 1.0");
        }
        if self.recovery.max_concurrent == 0 {
            return invalid("recovery.maxConcurrent", "must be at least 1");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("circuitBreaker.failureThreshold", "must be at least 1");
        }
        if self.resolution.kill_attempts == 0 {
            return invalid("resolution.killAttempts", "must be at least 1");
        }
        if self.scan.lookup_batch_size == 0 || self.scan.port_batch_size == 0 {
            return invalid("scan batch sizes", "must be positive");
        }
        Ok(())
    }
}

/// JSON-backed persistence for [`Config`].
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so readers never observe a half-written file.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at `~/.procport/config.json`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("No home directory for the config file".to_string()))?;
        Ok(Self::with_path(home.join(".procport").join("config.json")))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read and validate the stored configuration. A missing file yields defaults.
    pub async fn load(&self) -> Result<Config> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!(path = %self.path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let raw = fs::read_to_string(&self.path)
            .await
            .map_err(store_error("read", &self.path))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{} is not a valid config: {}", self.path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate and persist `config`, creating the parent directory on demand.
    pub async fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        let body = serde_json::to_vec_pretty(config)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(store_error("create directory for", &self.path))?;
        }

        let staging = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&staging)
            .await
            .map_err(store_error("stage", &self.path))?;
        file.write_all(&body)
            .await
            .map_err(store_error("write", &self.path))?;
        file.sync_all()
            .await
            .map_err(store_error("flush", &self.path))?;
        drop(file);

        fs::rename(&staging, &self.path)
            .await
            .map_err(store_error("replace", &self.path))?;
        debug!(path = %self.path.display(), "Config saved");
        Ok(())
    }
}

fn store_error<'a>(action: &'a str, path: &'a Path) -> impl Fn(std::io::Error) -> Error + 'a {
    move |e| Error::Config(format!("Cannot {} {}: {}", action, path.display(), e))
}
