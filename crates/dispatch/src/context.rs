//! Per-call context handed to operation bodies.

use crate::envelope::Headers;
use crate::registry::OperationError;
use corelib::cancel::CancelSignal;
use corelib::codec::Format;
use corelib::context::CorrelationId;
use std::sync::Arc;

/// Explicit call context. Operations read correlation and cancellation from
/// here, never from ambient state.
#[derive(Clone, Debug)]
pub struct CallContext {
    target: Arc<str>,
    correlation_id: CorrelationId,
    format: Format,
    headers: Arc<Headers>,
    cancel: CancelSignal,
}

impl CallContext {
    pub fn new(
        target: &str,
        correlation_id: CorrelationId,
        format: Format,
        headers: Headers,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            target: Arc::from(target),
            correlation_id,
            format,
            headers: Arc::new(headers),
            cancel,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Fires on caller disconnect or host shutdown, whichever comes first.
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> Result<(), OperationError> {
        if self.cancel.is_cancelled() {
            Err(OperationError::Cancelled)
        } else {
            Ok(())
        }
    }
}
