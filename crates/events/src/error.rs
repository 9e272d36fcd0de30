//! Event error types.

use thiserror::Error;

/// Why a scheduled item failed. Recorded on its handle, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The work returned an error.
    #[error("work failed: {0}")]
    Work(String),

    /// The work panicked.
    #[error("work panicked: {0}")]
    Panicked(String),
}
