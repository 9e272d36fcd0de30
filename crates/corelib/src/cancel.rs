//! Cooperative cancellation signals.
//!
//! A [`CancelSignal`] is a cloneable flag that flips once from "running" to
//! "cancelled". Work observes it at its own checkpoints; nothing is torn down
//! by force. Signals compose by logical OR through [`CancelSignal::any`].

use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// One-shot, cloneable cancellation flag.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    state: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Flip the signal. Idempotent.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the signal has been cancelled (immediately if it already was).
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// A guard that cancels this signal when dropped, unless disarmed.
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop {
            signal: Some(self.clone()),
        }
    }

    /// True if both handles observe the same underlying flag.
    pub fn same_as(&self, other: &CancelSignal) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Build a signal that is cancelled as soon as any of `sources` is.
    ///
    /// Must be called from within a tokio runtime. Forwarding stops when the
    /// returned [`LinkedSignal`] is dropped.
    pub fn any<I>(sources: I) -> LinkedSignal
    where
        I: IntoIterator<Item = CancelSignal>,
    {
        let signal = CancelSignal::new();
        let mut forwarders = JoinSet::new();

        for source in sources {
            if source.is_cancelled() {
                signal.cancel();
                continue;
            }
            let target = signal.clone();
            forwarders.spawn(async move {
                source.cancelled().await;
                target.cancel();
            });
        }

        if signal.is_cancelled() {
            forwarders.abort_all();
        }

        LinkedSignal {
            signal,
            _forwarders: forwarders,
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by [`CancelSignal::cancel_on_drop`].
#[must_use = "the signal is cancelled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct CancelOnDrop {
    signal: Option<CancelSignal>,
}

impl CancelOnDrop {
    pub fn disarm(mut self) {
        self.signal = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.cancel();
        }
    }
}

/// A signal derived from several sources, see [`CancelSignal::any`].
pub struct LinkedSignal {
    signal: CancelSignal,
    _forwarders: JoinSet<()>,
}

impl LinkedSignal {
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }
}

impl Deref for LinkedSignal {
    type Target = CancelSignal;

    fn deref(&self) -> &CancelSignal {
        &self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn observes_cancel(signal: &CancelSignal) -> bool {
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn test_cancel_is_sticky_and_idempotent() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        signal.cancel();
        signal.cancel();
        assert!(signal.is_cancelled());
        assert!(observes_cancel(&signal).await);
    }

    #[test]
    fn test_guard_cancels_on_drop() {
        let signal = CancelSignal::new();
        let guard = signal.cancel_on_drop();
        assert!(!signal.is_cancelled());
        drop(guard);
        assert!(signal.is_cancelled());

        let kept = CancelSignal::new();
        kept.cancel_on_drop().disarm();
        assert!(!kept.is_cancelled());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        clone.cancel();
        assert!(signal.is_cancelled());
        assert!(signal.same_as(&clone));
    }

    #[tokio::test]
    async fn test_any_fires_on_first_source() {
        let disconnect = CancelSignal::new();
        let shutdown = CancelSignal::new();
        let linked = CancelSignal::any([disconnect.clone(), shutdown.clone()]);
        assert!(!linked.is_cancelled());

        disconnect.cancel();
        assert!(observes_cancel(&linked).await);
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_any_fires_on_second_source() {
        let disconnect = CancelSignal::new();
        let shutdown = CancelSignal::new();
        let linked = CancelSignal::any([disconnect.clone(), shutdown.clone()]);

        shutdown.cancel();
        assert!(observes_cancel(&linked).await);
        assert!(!disconnect.is_cancelled());
    }

    #[tokio::test]
    async fn test_any_with_already_cancelled_source() {
        let done = CancelSignal::new();
        done.cancel();
        let linked = CancelSignal::any([CancelSignal::new(), done]);
        assert!(linked.is_cancelled());
    }

    #[tokio::test]
    async fn test_linked_does_not_cancel_sources() {
        let source = CancelSignal::new();
        let linked = CancelSignal::any([source.clone()]);
        linked.cancel();
        assert!(linked.is_cancelled());
        assert!(!source.is_cancelled());
    }
}
