//! Remote-call dispatch for dualcall operations.
//!
//! This crate provides the call path between a caller and a registered
//! operation:
//! - Request/response envelopes
//! - Operation registry and authorization
//! - Server-side `receive` and client-side `issue`
//! - In-process and framed-stream transports

pub mod auth;
pub mod client;
pub mod context;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod save;
pub mod server;
pub mod transport;

pub use auth::{AllowAll, AuthDecision, Authorizer, Requirements, RoleAuthorizer};
pub use client::{Call, CallOutcome, Client};
pub use context::CallContext;
pub use envelope::{Headers, RequestEnvelope, ResponseEnvelope};
pub use error::{DispatchError, TransportError};
pub use registry::{Operation, OperationError, OperationRegistry};
pub use save::save_operation;
pub use server::{DispatchConfig, Dispatcher};
pub use transport::{serve_connection, LocalTransport, StreamTransport, Transport};
