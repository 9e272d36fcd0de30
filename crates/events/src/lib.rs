//! Isolated fire-and-forget work for dualcall hosts.
//!
//! This crate provides:
//! - A dispatcher that runs each item in its own scope, detached from the caller
//! - An owned pending set with bounded and unbounded draining
//! - Handles for cancelling and observing individual items

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod scope;

pub use context::EventContext;
pub use dispatcher::{EventConfig, EventDispatcher, PendingEvent, WaitOutcome};
pub use error::EventError;
pub use handle::{EventHandle, EventId, Resolution};
pub use scope::{ScopeFactory, Unscoped};
