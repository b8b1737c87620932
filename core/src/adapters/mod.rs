//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`.
//! Each adapter handles communication with external systems:
//! - `executor`: validated, timeout-bounded subprocess execution
//! - `parser`: pure normalization of tool output
//! - `platform`: per-OS introspection built from the two

pub mod executor;
pub mod parser;
pub mod platform;

// Re-export main types for convenience
pub use executor::CommandExecutor;
pub use platform::{try_bind, DarwinAdapter, LinuxAdapter, NativeAdapter, WindowsAdapter};
