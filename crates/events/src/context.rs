//! Context handed to scheduled work.

use crate::handle::EventId;
use corelib::cancel::CancelSignal;
use corelib::context::CorrelationId;

#[derive(Clone, Debug)]
pub struct EventContext {
    id: EventId,
    label: String,
    correlation_id: CorrelationId,
    cancel: CancelSignal,
}

impl EventContext {
    pub(crate) fn new(
        id: EventId,
        label: String,
        correlation_id: CorrelationId,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            id,
            label,
            correlation_id,
            cancel,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Correlation id of the call that scheduled this item.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Fires when the scheduler's signal, the item's own handle or dispatcher
    /// shutdown cancels the item.
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
