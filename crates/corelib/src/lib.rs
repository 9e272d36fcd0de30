//! Core library for the dualcall remote-object stack.
//!
//! This crate provides the transport-independent pieces:
//! - The dual-format object-graph codec ([`codec`])
//! - Cancellation signals and their OR-composition ([`cancel`])
//! - Correlation identifiers ([`context`])
//! - Persistence-state save routing ([`save`])

pub mod cancel;
pub mod codec;
pub mod context;
pub mod error;
pub mod save;

pub use cancel::{CancelSignal, LinkedSignal};
pub use codec::{Format, ObjectRef, SerializationEngine, Shape, TypeRegistry, TypeSchema, Value};
pub use context::CorrelationId;
pub use error::{Error, Result};
pub use save::{PersistenceState, Persistable, SaveRouter, WriteOp};
