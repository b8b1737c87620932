//! Domain layer - Pure data models.
//!
//! This module contains the canonical records every platform's tool output is
//! normalized into. These types have no I/O dependencies and can be tested in
//! isolation.

mod network;
mod port;
mod process;
mod signal;

// Re-export all domain types
pub use network::{NetworkConnection, PortRecord, Protocol, ResolveOutcome, SystemMetrics};
pub use port::{ensure_port, parse_port, validate_port, validate_port_range};
pub use process::{
    PortKillOutcome, ProcessFilter, ProcessRecord, ProcessStatus, ProcessTree, SortField,
    SortOrder,
};
pub use signal::Signal;
