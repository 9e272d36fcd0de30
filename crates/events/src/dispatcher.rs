//! The event dispatcher.
//!
//! ## Lifecycle of an item
//!
//! 1. `schedule` creates the item's scope and registers it as pending
//! 2. The work runs detached on the runtime, in a task of its own
//! 3. Errors and panics are caught and logged, never propagated
//! 4. The item is removed from the pending set and its handle resolved
//!
//! No ordering is guaranteed between items.

use crate::context::EventContext;
use crate::error::EventError;
use crate::handle::{EventHandle, EventId, Resolution};
use crate::scope::ScopeFactory;
use corelib::cancel::CancelSignal;
use corelib::context::CorrelationId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Event dispatcher configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Bound on draining at host shutdown, in milliseconds. 0 waits without bound.
    pub drain_timeout_ms: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5_000,
        }
    }
}

impl EventConfig {
    pub fn drain_timeout(&self) -> Option<Duration> {
        (self.drain_timeout_ms > 0).then(|| Duration::from_millis(self.drain_timeout_ms))
    }
}

/// A still-unresolved item, as reported by [`EventDispatcher::pending`].
#[derive(Clone, Debug)]
pub struct PendingEvent {
    pub id: EventId,
    pub label: String,
    pub correlation_id: CorrelationId,
    pub scheduled_at: Instant,
}

#[derive(Debug)]
pub enum WaitOutcome {
    /// The pending set emptied.
    Drained,
    /// The timeout elapsed first. Nothing was cancelled.
    TimedOut { remaining: Vec<PendingEvent> },
}

impl WaitOutcome {
    pub fn is_drained(&self) -> bool {
        matches!(self, WaitOutcome::Drained)
    }
}

struct Inner<F> {
    factory: F,
    pending: DashMap<EventId, PendingEvent>,
    drained: Notify,
    shutdown: CancelSignal,
    next_id: AtomicU64,
}

impl<F> Inner<F> {
    fn resolve(&self, id: EventId, resolution: Resolution, tx: watch::Sender<Option<Resolution>>) {
        let outcome = match &resolution {
            Resolution::Succeeded => "succeeded",
            Resolution::Failed(_) => "failed",
            Resolution::Cancelled => "cancelled",
        };
        metrics::counter!("dualcall_events_resolved_total", "outcome" => outcome).increment(1);

        self.pending.remove(&id);
        metrics::gauge!("dualcall_events_pending").set(self.pending.len() as f64);
        tx.send_replace(Some(resolution));

        if self.pending.is_empty() {
            self.drained.notify_waiters();
        }
    }
}

/// Runs scheduled work in isolation and tracks it until it resolves.
pub struct EventDispatcher<F: ScopeFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: ScopeFactory> Clone for EventDispatcher<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ScopeFactory> EventDispatcher<F> {
    pub fn new(factory: F) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                pending: DashMap::new(),
                drained: Notify::new(),
                shutdown: CancelSignal::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Schedule `work` and return immediately.
    ///
    /// The item is pending from before this returns until it resolves. It is
    /// cancelled when `cancel` fires, when its handle is cancelled, or on
    /// [`EventDispatcher::shutdown`].
    pub fn schedule<W, Fut>(
        &self,
        label: impl Into<String>,
        correlation_id: CorrelationId,
        cancel: CancelSignal,
        work: W,
    ) -> EventHandle
    where
        W: FnOnce(F::Scope, EventContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        let id = EventId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let scope = self.inner.factory.create_scope(&label);
        let own_cancel = CancelSignal::new();
        let (tx, rx) = watch::channel(None);

        self.inner.pending.insert(
            id,
            PendingEvent {
                id,
                label: label.clone(),
                correlation_id: correlation_id.clone(),
                scheduled_at: Instant::now(),
            },
        );
        metrics::gauge!("dualcall_events_pending").set(self.inner.pending.len() as f64);

        let span = info_span!(
            "event",
            event_id = %id,
            label = %label,
            correlation_id = %correlation_id,
        );
        let sources = [cancel, own_cancel.clone(), self.inner.shutdown.clone()];
        let inner = self.inner.clone();

        tokio::spawn(
            async move {
                debug!("event started");
                let linked = CancelSignal::any(sources);
                let ctx = EventContext::new(id, label, correlation_id, linked.signal().clone());

                // A task of its own, so a panic stays inside it.
                let outcome = tokio::spawn(work(scope, ctx).in_current_span()).await;
                let resolution = match outcome {
                    Ok(Ok(())) => {
                        debug!("event succeeded");
                        Resolution::Succeeded
                    }
                    Ok(Err(e)) if linked.is_cancelled() => {
                        debug!(error = %e, "event stopped after cancellation");
                        Resolution::Cancelled
                    }
                    Ok(Err(e)) => {
                        let message = format!("{:#}", e);
                        warn!(error = %message, "event failed");
                        Resolution::Failed(EventError::Work(message))
                    }
                    Err(e) if e.is_panic() => {
                        let message = panic_message(e.into_panic());
                        error!(panic = %message, "event panicked");
                        Resolution::Failed(EventError::Panicked(message))
                    }
                    Err(_) => Resolution::Cancelled,
                };
                inner.resolve(id, resolution, tx);
            }
            .instrument(span),
        );

        EventHandle::new(id, own_cancel, rx)
    }

    /// Wait until no item is pending, or until `timeout` elapses.
    ///
    /// `None` and a zero duration both wait without bound. Never cancels
    /// anything; on timeout the unresolved items are reported.
    pub async fn wait_all(&self, timeout: Option<Duration>) -> WaitOutcome {
        let drained = async {
            loop {
                // Created before the check so a notification in between is not lost.
                let notified = self.inner.drained.notified();
                if self.inner.pending.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        match timeout.filter(|t| !t.is_zero()) {
            None => {
                drained.await;
                WaitOutcome::Drained
            }
            Some(limit) => match tokio::time::timeout(limit, drained).await {
                Ok(()) => WaitOutcome::Drained,
                Err(_) => {
                    let remaining = self.pending();
                    info!(remaining = remaining.len(), "wait for pending events timed out");
                    WaitOutcome::TimedOut { remaining }
                }
            },
        }
    }

    /// Instantaneous size of the pending set.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Snapshot of the pending set, oldest first.
    pub fn pending(&self) -> Vec<PendingEvent> {
        let mut pending: Vec<_> = self.inner.pending.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|p| p.id);
        pending
    }

    /// Cancel every scheduled item, including ones scheduled from now on.
    pub fn shutdown(&self) {
        info!(pending = self.pending_count(), "event dispatcher shutting down");
        self.inner.shutdown.cancel();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_drain_timeout_is_unbounded() {
        let config: EventConfig = serde_json::from_str(r#"{"drain_timeout_ms": 0}"#).unwrap();
        assert_eq!(config.drain_timeout(), None);
        assert_eq!(
            EventConfig::default().drain_timeout(),
            Some(Duration::from_millis(5_000))
        );
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
