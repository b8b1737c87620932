//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces that the application layer uses
//! to interact with external systems. Implementations live in `adapters`.

mod platform;
mod runner;

pub use platform::{HostPlatform, PlatformAdapter};
pub use runner::{CommandRunner, ExecuteOptions, ExecutionResult, DEFAULT_TIMEOUT};
