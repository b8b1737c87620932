//! Application layer - Use case services.
//!
//! This module contains application services that orchestrate
//! domain logic and adapter interactions.
//!
//! Services are designed to be thin orchestrators that:
//! - Accept domain types as inputs
//! - Use ports (traits) for external dependencies
//! - Return domain types as outputs
//!
//! Every adapter read passes through the [`ErrorRecoveryManager`], so a
//! flaky tool degrades a result instead of failing the caller.

mod port_scanner;
mod process_manager;
mod recovery;

pub use port_scanner::{CacheStats, PortScanner, ResolveOptions, ScanOptions};
pub use process_manager::ProcessManager;
pub use recovery::{
    classify, nearby_ports, BoxFuture, CircuitSnapshot, CircuitState, DegradationContext,
    ErrorRecoveryManager, FallbackStrategy, GracefulDegradation, OperationStats,
    RecoveryOptions, RecoveryOutcome, RecoverySource,
};
