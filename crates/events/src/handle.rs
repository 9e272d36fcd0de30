//! Handles to scheduled items.

use crate::error::EventError;
use corelib::cancel::CancelSignal;
use std::fmt;
use tokio::sync::watch;

/// Identifier of one scheduled item, unique per dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event-{}", self.0)
    }
}

/// How an item ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Succeeded,
    Failed(EventError),
    Cancelled,
}

/// Caller-side view of one scheduled item.
#[derive(Clone, Debug)]
pub struct EventHandle {
    id: EventId,
    cancel: CancelSignal,
    resolution: watch::Receiver<Option<Resolution>>,
}

impl EventHandle {
    pub(crate) fn new(
        id: EventId,
        cancel: CancelSignal,
        resolution: watch::Receiver<Option<Resolution>>,
    ) -> Self {
        Self {
            id,
            cancel,
            resolution,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    /// Ask this item to stop. Cooperative.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.borrow().is_some()
    }

    /// Wait for the item to resolve.
    pub async fn resolution(&self) -> Resolution {
        let mut rx = self.resolution.clone();
        let resolution = match rx.wait_for(Option::is_some).await {
            Ok(resolution) => resolution.clone().unwrap_or(Resolution::Cancelled),
            // The runtime dropped the item before it resolved.
            Err(_) => Resolution::Cancelled,
        };
        resolution
    }
}
