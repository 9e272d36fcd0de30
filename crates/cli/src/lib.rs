//! Host binary for the dual-format call stack.
//!
//! Provides commands for:
//! - Showing how a save is routed for a persistence state
//! - Round-tripping a cyclic graph through both wire formats
//! - Issuing demo calls in process or over a framed stream
//! - Scheduling fire-and-forget work and draining it

pub mod commands;
pub mod config;
pub mod demo;
pub mod logging;

pub use commands::{Command, CommandResult};
pub use config::{CliConfig, HostConfig};
