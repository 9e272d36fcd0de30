//! Ordinal body: the positional wire tree, packed with bincode.

use super::wire::Wire;
use crate::error::{DecodingError, EncodingError};
use bincode::Options;

/// Upper bound on an ordinal body, in bytes.
pub const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_BODY_BYTES)
        .reject_trailing_bytes()
}

pub(crate) fn to_bytes(wire: &Wire) -> Result<Vec<u8>, EncodingError> {
    options()
        .serialize(wire)
        .map_err(|e| EncodingError::Serialize(e.to_string()))
}

pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Wire, DecodingError> {
    options()
        .deserialize(bytes)
        .map_err(|e| DecodingError::Malformed(e.to_string()))
}
