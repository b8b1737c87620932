//! procport Core Library
//!
//! Cross-platform library for process and port introspection.
//! Provides functionality to:
//! - List, find and kill processes (gracefully or forcefully)
//! - Enumerate sockets and the processes that own them
//! - Find free ports and resolve port conflicts (kill → verify → execute)
//! - Recover from flaky system tools (circuit breaker, adaptive retry,
//!   fallbacks, graceful degradation)
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure data models and validation
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: External system implementations
//! - `application`: Use case services
//!
//! A [`Context`] built once from a [`Config`] wires them together.
//!
//! # Platform Support
//! - Linux: Uses `ps`, `ss` (falling back to `netstat` and `lsof`) and `/proc`
//! - macOS: Uses `ps`, `lsof`, `sysctl` and `vm_stat`
//! - Windows: Uses `wmic`, `tasklist`, `taskkill` and `netstat`

// Hexagonal architecture layers
pub mod adapters;
pub mod application;
pub mod domain;
pub mod ports;

pub mod config;
pub mod context;
pub mod error;

#[cfg(test)]
mod testing;

// Re-export domain types (primary API)
pub use domain::{
    NetworkConnection, PortKillOutcome, PortRecord, ProcessFilter, ProcessRecord, ProcessStatus,
    ProcessTree, Protocol, ResolveOutcome, Signal, SortField, SortOrder, SystemMetrics,
};

// Re-export other commonly used types
pub use adapters::{CommandExecutor, NativeAdapter};
pub use application::{
    ErrorRecoveryManager, PortScanner, ProcessManager, RecoveryOptions, ResolveOptions,
    ScanOptions,
};
pub use config::{Config, ConfigStore};
pub use context::Context;
pub use error::{Error, ErrorCategory, ExitCode, Result};
pub use ports::{CommandRunner, HostPlatform, PlatformAdapter};
