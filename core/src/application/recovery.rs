//! Error recovery: circuit breaker, adaptive retry, fallbacks and graceful
//! degradation.
//!
//! Every call goes through the same layers, in order:
//!
//! 1. The circuit breaker for the operation key. An open circuit fails fast
//!    without invoking the operation.
//! 2. Retries with exponential backoff, scaled by the key's success history.
//! 3. Registered fallback strategies for the result type, highest priority
//!    first, filtered by error category.
//! 4. The caller's own fallback.
//! 5. A degraded result synthesized from the error category.
//!
//! Only when every layer fails does the (classified) error reach the caller.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{CircuitBreakerConfig, RecoveryConfig};
use crate::domain::{NetworkConnection, ProcessRecord, SystemMetrics};
use crate::error::{Error, ErrorCategory, Result};

/// Boxed future produced by fallbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

type FallbackHandler<T> = Arc<dyn Fn(&Error) -> BoxFuture<'static, T> + Send + Sync>;

// ============================================================================
// Circuit breaker
// ============================================================================

/// Breaker position for one operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    trial_started: Option<Instant>,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            next_attempt: None,
            trial_started: None,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    pub next_attempt: Option<Instant>,
}

/// Attempt history for one operation key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub attempts: u64,
    pub successes: u64,
}

impl OperationStats {
    /// `None` until the operation has run at least once.
    pub fn success_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            None
        } else {
            Some(self.successes as f64 / self.attempts as f64)
        }
    }
}

// ============================================================================
// Fallbacks and degradation
// ============================================================================

/// A registered alternative way of producing a `T`.
pub struct FallbackStrategy<T> {
    pub name: String,
    /// Higher runs first.
    pub priority: i32,
    /// Categories this strategy handles. Empty handles all.
    pub categories: Vec<ErrorCategory>,
    handler: FallbackHandler<T>,
}

impl<T> FallbackStrategy<T> {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        priority: i32,
        categories: Vec<ErrorCategory>,
        handler: F,
    ) -> Self
    where
        F: Fn(&Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            categories,
            handler: Arc::new(move |error| Box::pin(handler(error))),
        }
    }

    pub fn handles(&self, category: ErrorCategory) -> bool {
        self.categories.is_empty() || self.categories.contains(&category)
    }
}

impl<T> Clone for FallbackStrategy<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            priority: self.priority,
            categories: self.categories.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// What a degraded result may be derived from.
#[derive(Debug, Clone, Copy)]
pub struct DegradationContext<'a> {
    pub category: ErrorCategory,
    pub operation: &'a str,
    /// Port the operation was about, when there is one.
    pub port: Option<u16>,
}

/// Types with a limited-but-usable stand-in for when every source failed.
pub trait GracefulDegradation: Sized {
    fn degrade(context: &DegradationContext<'_>) -> Option<Self>;
}

/// Only the current process is certain to exist.
impl GracefulDegradation for Vec<ProcessRecord> {
    fn degrade(_context: &DegradationContext<'_>) -> Option<Self> {
        let pid = std::process::id();
        let command = std::env::args().collect::<Vec<_>>().join(" ");
        let name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "self".to_string());
        Some(vec![ProcessRecord::new(pid, name, command)])
    }
}

impl GracefulDegradation for Vec<NetworkConnection> {
    fn degrade(context: &DegradationContext<'_>) -> Option<Self> {
        match context.category {
            ErrorCategory::Permission => None,
            _ => Some(Vec::new()),
        }
    }
}

impl GracefulDegradation for SystemMetrics {
    fn degrade(_context: &DegradationContext<'_>) -> Option<Self> {
        let mut metrics = SystemMetrics::basic();
        metrics.degraded = true;
        Some(metrics)
    }
}

/// Nearby ports as suggested alternatives.
impl GracefulDegradation for Vec<u16> {
    fn degrade(context: &DegradationContext<'_>) -> Option<Self> {
        let port = context.port?;
        Some(nearby_ports(port, 10))
    }
}

/// No stand-in: an absent owner would be indistinguishable from a free port.
impl GracefulDegradation for Option<ProcessRecord> {
    fn degrade(_context: &DegradationContext<'_>) -> Option<Self> {
        None
    }
}

/// Availability answers are never synthesized.
impl GracefulDegradation for bool {
    fn degrade(_context: &DegradationContext<'_>) -> Option<Self> {
        None
    }
}

impl GracefulDegradation for u16 {
    fn degrade(_context: &DegradationContext<'_>) -> Option<Self> {
        None
    }
}

/// `count` ports above `port`, continuing below it near the top of the range.
pub fn nearby_ports(port: u16, count: usize) -> Vec<u16> {
    let above = (u32::from(port) + 1..=u32::from(u16::MAX)).take(count);
    let mut ports: Vec<u16> = above.filter_map(|p| u16::try_from(p).ok()).collect();
    let mut below = port.saturating_sub(1);
    while ports.len() < count && below >= 1 {
        ports.push(below);
        below -= 1;
    }
    ports
}

// ============================================================================
// Recovery outcome and options
// ============================================================================

/// Which layer produced a recovered value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySource {
    Primary,
    Fallback(String),
    CallerFallback,
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome<T> {
    pub value: T,
    pub source: RecoverySource,
    /// Primary attempts made.
    pub attempts: u32,
}

impl<T> RecoveryOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        self.source == RecoverySource::Degraded
    }
}

/// Per-call overrides.
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<Duration>,
    /// Port hint for degraded results.
    pub port: Option<u16>,
    /// Allow a degraded result as the last layer.
    pub degrade: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: None,
            port: None,
            degrade: true,
        }
    }
}

impl RecoveryOptions {
    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn for_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn without_degradation(mut self) -> Self {
        self.degrade = false;
        self
    }
}

// ============================================================================
// Error classification
// ============================================================================

/// Map raw tool or OS failures onto the error taxonomy by message content.
///
/// Already-classified errors pass through unchanged.
pub fn classify(error: Error) -> Error {
    if !error.is_unclassified() {
        return error;
    }
    let message = error.to_string();
    // the command line itself may mention "process" or "port"
    let lower = match &error {
        Error::CommandFailed { stderr, .. } => stderr.to_lowercase(),
        other => other.to_string().to_lowercase(),
    };

    if lower.contains("permission") || lower.contains("access denied") || lower.contains("not permitted") {
        Error::PermissionDenied(message)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        Error::Timeout {
            operation: message,
            after: Duration::ZERO,
        }
    } else if lower.contains("unsupported") || lower.contains("not supported") || lower.contains("platform") {
        Error::UnsupportedPlatform(message)
    } else if lower.contains("address in use") || lower.contains("address already in use") || lower.contains("port") {
        Error::PortScanFailed(message)
    } else if lower.contains("no such process") || lower.contains("process") {
        Error::ProcessNotFound(message)
    } else {
        error
    }
}

// ============================================================================
// ErrorRecoveryManager
// ============================================================================

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Half-open trial slot held for the duration of one call.
///
/// A trial that ends without recording a verdict (validation error,
/// cancellation) hands the slot back so the next call can try.
struct TrialSlot<'a> {
    manager: &'a ErrorRecoveryManager,
    key: &'a str,
    started: Instant,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        self.manager.release_trial(self.key, self.started);
    }
}

/// Cross-cutting resilience for adapter calls.
pub struct ErrorRecoveryManager {
    config: RecoveryConfig,
    breaker_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
    stats: Mutex<HashMap<String, OperationStats>>,
    fallbacks: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    active: AtomicUsize,
}

impl ErrorRecoveryManager {
    pub fn new(config: RecoveryConfig, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breaker_config,
            breakers: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            fallbacks: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Register a fallback for every recovery producing a `T`.
    pub fn register_fallback<T: Send + 'static>(&self, strategy: FallbackStrategy<T>) {
        let mut fallbacks = self.fallbacks.write();
        let entry = fallbacks
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Vec::<FallbackStrategy<T>>::new()));
        if let Some(list) = entry.downcast_mut::<Vec<FallbackStrategy<T>>>() {
            debug!(name = %strategy.name, priority = strategy.priority, "Registered fallback strategy");
            list.push(strategy);
            list.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
    }

    fn fallbacks_for<T: Send + 'static>(&self, category: ErrorCategory) -> Vec<FallbackStrategy<T>> {
        self.fallbacks
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<Vec<FallbackStrategy<T>>>())
            .map(|list| list.iter().filter(|s| s.handles(category)).cloned().collect())
            .unwrap_or_default()
    }

    /// Run `operation` through every recovery layer and return the value.
    pub async fn execute_with_recovery<'a, T, F, Fut>(
        &self,
        key: &str,
        operation: F,
        fallback: Option<BoxFuture<'a, T>>,
        options: RecoveryOptions,
    ) -> Result<T>
    where
        T: GracefulDegradation + Send + 'static,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.recover(key, operation, fallback, options)
            .await
            .map(|outcome| outcome.value)
    }

    /// Like [`execute_with_recovery`](Self::execute_with_recovery), reporting
    /// which layer produced the value.
    pub async fn recover<'a, T, F, Fut>(
        &self,
        key: &str,
        mut operation: F,
        fallback: Option<BoxFuture<'a, T>>,
        options: RecoveryOptions,
    ) -> Result<RecoveryOutcome<T>>
    where
        T: GracefulDegradation + Send + 'static,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let _guard = self.enter()?;
        let trial = self.admit(key)?.map(|started| TrialSlot {
            manager: self,
            key,
            started,
        });

        let max_attempts = if trial.is_some() {
            1
        } else {
            options.max_attempts.unwrap_or(self.config.max_attempts).max(1)
        };

        let mut attempt = 1;
        let error = loop {
            match operation().await {
                Ok(value) => {
                    self.record_attempt(key, true);
                    self.record_success(key);
                    return Ok(RecoveryOutcome {
                        value,
                        source: RecoverySource::Primary,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    self.record_attempt(key, false);
                    let e = classify(e);
                    if attempt >= max_attempts || !e.is_retryable() {
                        break e;
                    }
                    let delay = self.retry_delay(key, attempt, options.base_delay);
                    debug!(
                        operation = key,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        if error.category() != ErrorCategory::Validation {
            self.record_failure(key);
        }
        if !error.is_recoverable() {
            return Err(error);
        }

        let category = error.category();
        for strategy in self.fallbacks_for::<T>(category) {
            match (strategy.handler)(&error).await {
                Ok(value) => {
                    info!(operation = key, strategy = %strategy.name, "Recovered with fallback strategy");
                    return Ok(RecoveryOutcome {
                        value,
                        source: RecoverySource::Fallback(strategy.name),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    debug!(operation = key, strategy = %strategy.name, error = %e, "Fallback strategy failed");
                }
            }
        }

        if let Some(fallback) = fallback {
            match fallback.await {
                Ok(value) => {
                    info!(operation = key, "Recovered with caller fallback");
                    return Ok(RecoveryOutcome {
                        value,
                        source: RecoverySource::CallerFallback,
                        attempts: attempt,
                    });
                }
                Err(e) => debug!(operation = key, error = %e, "Caller fallback failed"),
            }
        }

        if options.degrade {
            let context = DegradationContext {
                category,
                operation: key,
                port: options.port,
            };
            if let Some(value) = T::degrade(&context) {
                warn!(
                    operation = key,
                    category = %category,
                    error = %error,
                    "Returning degraded result"
                );
                return Ok(RecoveryOutcome {
                    value,
                    source: RecoverySource::Degraded,
                    attempts: attempt,
                });
            }
        }

        Err(error)
    }

    /// Delay before retry number `attempt + 1`.
    pub fn retry_delay(&self, key: &str, attempt: u32, base: Option<Duration>) -> Duration {
        let base_ms = base.unwrap_or_else(|| self.config.base_delay()).as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let mut delay_ms = base_ms * self.config.backoff_multiplier.powi(exponent);

        if self.config.adaptive {
            let factor = match self.operation_stats(key).and_then(|s| s.success_rate()) {
                None => 1.0,
                Some(rate) if rate < 0.5 => 1.5,
                Some(_) => 0.8,
            };
            delay_ms *= factor;
        }

        let capped = delay_ms.clamp(0.0, self.config.max_delay_ms as f64);
        Duration::from_millis(capped.round() as u64)
    }

    fn enter(&self) -> Result<ActiveGuard<'_>> {
        let limit = self.config.max_concurrent;
        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        if previous >= limit {
            self.active.fetch_sub(1, Ordering::SeqCst);
            warn!(active = previous, limit = limit, "Recovery capacity exhausted");
            return Err(Error::RecoveryOverloaded {
                active: previous,
                limit,
            });
        }
        Ok(ActiveGuard(&self.active))
    }

    /// Gate a call on the breaker. `Ok(Some(started))` marks a half-open trial.
    fn admit(&self, key: &str) -> Result<Option<Instant>> {
        let now = Instant::now();
        let cooldown = self.breaker_config.cooldown();
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(key.to_string()).or_default();

        match breaker.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => match breaker.next_attempt {
                Some(next) if now < next => Err(Error::CircuitOpen {
                    key: key.to_string(),
                    retry_after: next - now,
                }),
                _ => {
                    info!(operation = key, "Circuit half-open, allowing trial call");
                    breaker.state = CircuitState::HalfOpen;
                    breaker.trial_started = Some(now);
                    Ok(Some(now))
                }
            },
            // A trial abandoned mid-flight frees the slot after one cooldown.
            CircuitState::HalfOpen => match breaker.trial_started {
                Some(started) if now < started + cooldown => Err(Error::CircuitOpen {
                    key: key.to_string(),
                    retry_after: started + cooldown - now,
                }),
                _ => {
                    breaker.trial_started = Some(now);
                    Ok(Some(now))
                }
            },
        }
    }

    /// Free a half-open slot still held by the trial that began at `started`.
    fn release_trial(&self, key: &str, started: Instant) {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get_mut(key) {
            if breaker.state == CircuitState::HalfOpen && breaker.trial_started == Some(started) {
                debug!(operation = key, "Half-open trial ended without a verdict");
                breaker.trial_started = None;
            }
        }
    }

    fn record_success(&self, key: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(key.to_string()).or_default();
        if breaker.state != CircuitState::Closed {
            info!(operation = key, "Circuit closed");
        }
        *breaker = Breaker::default();
    }

    fn record_failure(&self, key: &str) {
        let now = Instant::now();
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(key.to_string()).or_default();
        breaker.failure_count += 1;
        breaker.last_failure = Some(now);

        let trip = breaker.state == CircuitState::HalfOpen
            || breaker.failure_count >= self.breaker_config.failure_threshold;
        if trip {
            warn!(
                operation = key,
                failures = breaker.failure_count,
                "Circuit opened"
            );
            breaker.state = CircuitState::Open;
            breaker.next_attempt = Some(now + self.breaker_config.cooldown());
            breaker.trial_started = None;
        }
    }

    fn record_attempt(&self, key: &str, success: bool) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(key.to_string()).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
    }

    pub fn circuit_state(&self, key: &str) -> CircuitState {
        self.breakers
            .lock()
            .get(key)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn circuit_snapshot(&self, key: &str) -> Option<CircuitSnapshot> {
        self.breakers.lock().get(key).map(|b| CircuitSnapshot {
            state: b.state,
            failure_count: b.failure_count,
            last_failure: b.last_failure,
            next_attempt: b.next_attempt,
        })
    }

    /// Force a breaker back to closed.
    pub fn reset_circuit(&self, key: &str) {
        self.breakers.lock().remove(key);
    }

    pub fn operation_stats(&self, key: &str) -> Option<OperationStats> {
        self.stats.lock().get(key).copied()
    }

    pub fn active_recoveries(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for ErrorRecoveryManager {
    fn default() -> Self {
        Self::new(RecoveryConfig::default(), CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn manager(max_attempts: u32) -> ErrorRecoveryManager {
        let config = RecoveryConfig {
            max_attempts,
            base_delay_ms: 10,
            ..RecoveryConfig::default()
        };
        ErrorRecoveryManager::new(config, CircuitBreakerConfig::default())
    }

    fn failing(calls: &AtomicU32) -> impl FnMut() -> std::future::Ready<Result<u16>> + Send + '_ {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(Error::SystemCallFailed("boom".into())))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let manager = manager(3);
        let calls = AtomicU32::new(0);
        let outcome = manager
            .recover(
                "op",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(Error::SystemCallFailed("flaky".into()))
                        } else {
                            Ok(42u16)
                        }
                    }
                },
                None,
                RecoveryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.source, RecoverySource::Primary);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(manager.circuit_state("op"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_not_retried() {
        let manager = manager(3);
        let calls = AtomicU32::new(0);
        let err = manager
            .execute_with_recovery(
                "op",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Err::<u16, _>(Error::Validation("bad".into())))
                },
                None,
                RecoveryOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_fails_fast() {
        let manager = manager(1);
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let err = manager
                .execute_with_recovery("scan", failing(&calls), None, RecoveryOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "SYSTEM_CALL_FAILED");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(manager.circuit_state("scan"), CircuitState::Open);

        let err = manager
            .execute_with_recovery("scan", failing(&calls), None, RecoveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // other keys are unaffected
        assert_eq!(manager.circuit_state("other"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_one_trial() {
        let manager = manager(3);
        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let _ = manager
                .execute_with_recovery("k", failing(&calls), None, RecoveryOptions::default().attempts(1))
                .await;
        }
        assert_eq!(manager.circuit_state("k"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(60_001)).await;

        // trial fails: exactly one invocation, no retries, back to open
        let before = calls.load(Ordering::SeqCst);
        let err = manager
            .execute_with_recovery("k", failing(&calls), None, RecoveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SYSTEM_CALL_FAILED");
        assert_eq!(calls.load(Ordering::SeqCst), before + 1);
        assert_eq!(manager.circuit_state("k"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(60_001)).await;

        // trial succeeds: closed again
        let value = manager
            .execute_with_recovery("k", || async { Ok::<_, Error>(7u16) }, None, RecoveryOptions::default())
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(manager.circuit_state("k"), CircuitState::Closed);
        assert_eq!(manager.circuit_snapshot("k").unwrap().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_validation_error_frees_trial() {
        let manager = manager(1);
        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let _ = manager
                .execute_with_recovery("k", failing(&calls), None, RecoveryOptions::default())
                .await;
        }
        tokio::time::advance(Duration::from_millis(60_001)).await;

        let err = manager
            .execute_with_recovery(
                "k",
                || async { Err::<u16, _>(Error::Validation("bad port".into())) },
                None,
                RecoveryOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(manager.circuit_state("k"), CircuitState::HalfOpen);

        // no cooldown wait: the slot was handed back
        let value = manager
            .execute_with_recovery("k", || async { Ok::<_, Error>(9u16) }, None, RecoveryOptions::default())
            .await
            .unwrap();
        assert_eq!(value, 9);
        assert_eq!(manager.circuit_state("k"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_layers_in_order() {
        let manager = manager(1);
        manager.register_fallback(FallbackStrategy::new(
            "low",
            1,
            vec![],
            |_e: &Error| async { Ok::<_, Error>(1u16) },
        ));
        manager.register_fallback(FallbackStrategy::new(
            "high-but-failing",
            10,
            vec![],
            |_e: &Error| async { Err::<u16, _>(Error::SystemCallFailed("nope".into())) },
        ));
        manager.register_fallback(FallbackStrategy::new(
            "timeouts-only",
            20,
            vec![ErrorCategory::Timeout],
            |_e: &Error| async { Ok::<_, Error>(3u16) },
        ));

        let calls = AtomicU32::new(0);
        let outcome = manager
            .recover("f", failing(&calls), None, RecoveryOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.value, 1);
        assert_eq!(outcome.source, RecoverySource::Fallback("low".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_fallback_then_degradation() {
        let manager = manager(1);
        let calls = AtomicU32::new(0);

        let outcome = manager
            .recover(
                "c",
                failing(&calls),
                Some(Box::pin(async { Ok::<_, Error>(9u16) })),
                RecoveryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.source, RecoverySource::CallerFallback);
        assert_eq!(outcome.value, 9);

        let outcome = manager
            .recover(
                "metrics",
                || async { Err::<SystemMetrics, _>(Error::SystemCallFailed("uptime missing".into())) },
                None,
                RecoveryOptions::default(),
            )
            .await
            .unwrap();
        assert!(outcome.is_degraded());
        assert!(outcome.value.degraded);

        let err = manager
            .recover(
                "metrics2",
                || async { Err::<SystemMetrics, _>(Error::SystemCallFailed("uptime missing".into())) },
                None,
                RecoveryOptions::default().without_degradation(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SYSTEM_CALL_FAILED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_errors_skip_fallbacks() {
        let manager = manager(1);
        let outcome = manager
            .recover(
                "p",
                || async { Err::<SystemMetrics, _>(Error::UnsupportedPlatform("plan9".into())) },
                None,
                RecoveryOptions::default(),
            )
            .await;
        assert_eq!(outcome.unwrap_err().code(), "PLATFORM_UNSUPPORTED");
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let config = RecoveryConfig {
            max_concurrent: 1,
            ..RecoveryConfig::default()
        };
        let manager = Arc::new(ErrorRecoveryManager::new(config, CircuitBreakerConfig::default()));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));

        let held = {
            let manager = Arc::clone(&manager);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                manager
                    .execute_with_recovery(
                        "slow",
                        move || {
                            let rx = Arc::clone(&rx);
                            async move {
                                if let Some(rx) = rx.lock().await.take() {
                                    let _ = rx.await;
                                }
                                Ok::<_, Error>(1u16)
                            }
                        },
                        None,
                        RecoveryOptions::default(),
                    )
                    .await
            })
        };

        while manager.active_recoveries() == 0 {
            tokio::task::yield_now().await;
        }
        let err = manager
            .execute_with_recovery("fast", || async { Ok::<_, Error>(2u16) }, None, RecoveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RECOVERY_OVERLOADED");

        tx.send(()).unwrap();
        assert_eq!(held.await.unwrap().unwrap(), 1);
        assert_eq!(manager.active_recoveries(), 0);
    }

    #[test]
    fn test_adaptive_delay() {
        let manager = manager(3);
        // no history: plain exponential backoff
        assert_eq!(manager.retry_delay("x", 1, None), Duration::from_millis(10));
        assert_eq!(manager.retry_delay("x", 3, None), Duration::from_millis(40));

        manager.record_attempt("bad", false);
        manager.record_attempt("bad", false);
        manager.record_attempt("bad", true);
        assert_eq!(manager.retry_delay("bad", 1, None), Duration::from_millis(15));

        manager.record_attempt("good", true);
        assert_eq!(manager.retry_delay("good", 1, None), Duration::from_millis(8));

        let capped = manager.retry_delay("x", 20, Some(Duration::from_secs(1)));
        assert_eq!(capped, Duration::from_millis(10_000));
    }

    #[test]
    fn test_classify() {
        let raw = |msg: &str| Error::CommandFailed {
            command: "ss -tulnp".into(),
            code: Some(1),
            stderr: msg.into(),
        };
        assert_eq!(classify(raw("Operation not permitted")).code(), "PERMISSION_DENIED");
        assert_eq!(classify(raw("connection timed out")).code(), "TIMEOUT");
        assert_eq!(classify(raw("bind: address already in use")).code(), "PORT_SCAN_FAILED");
        assert_eq!(classify(raw("No such process")).code(), "PROCESS_NOT_FOUND");
        assert_eq!(classify(raw("option unsupported here")).code(), "PLATFORM_UNSUPPORTED");
        assert_eq!(classify(raw("segfault")).code(), "SYSTEM_CALL_FAILED");
        // typed errors pass through
        assert_eq!(classify(Error::NoFreePort { start: 1, end: 2 }).code(), "NO_FREE_PORT");
    }

    #[test]
    fn test_degradation_results() {
        let ctx = DegradationContext {
            category: ErrorCategory::System,
            operation: "list_processes",
            port: Some(3000),
        };
        let processes = <Vec<ProcessRecord>>::degrade(&ctx).unwrap();
        assert_eq!(processes[0].pid, std::process::id());
        assert_eq!(<Vec<u16>>::degrade(&ctx).unwrap(), (3001..=3010).collect::<Vec<u16>>());
        assert!(<Option<ProcessRecord>>::degrade(&ctx).is_none());
        assert_eq!(nearby_ports(65535, 2), vec![65534, 65533]);
    }
}
