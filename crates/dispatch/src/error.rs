//! Dispatch error types.

use corelib::codec::Format;
use corelib::error::{DecodingError, EncodingError};
use thiserror::Error;

/// Local failure of a call: the call never produced a remote outcome.
///
/// Denials, faults and cancellations reported by the server are not errors;
/// they arrive as [`crate::CallOutcome`] variants.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Arguments could not be encoded; nothing was sent.
    #[error("encoding arguments: {0}")]
    Encoding(#[from] EncodingError),

    /// The result body could not be decoded.
    #[error("decoding result: {0}")]
    Decoding(#[from] DecodingError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// The response belongs to a different call.
    #[error("correlation mismatch: sent `{sent}`, received `{received}`")]
    CorrelationMismatch { sent: String, received: String },

    /// The response was written in a different format than requested.
    #[error("format mismatch: sent {sent}, received {received}")]
    FormatMismatch { sent: Format, received: Format },

    #[error("operation target `{0}` registered twice")]
    DuplicateTarget(String),
}

/// Transport error type.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("connection closed")]
    ConnectionClosed,

    /// Another call on the same connection already waits under this id.
    #[error("correlation id `{0}` already in flight")]
    CorrelationInFlight(String),
}

/// Result type alias using DispatchError.
pub type DispatchResult<T> = Result<T, DispatchError>;
