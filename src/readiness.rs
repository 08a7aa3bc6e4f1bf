//! Readiness gate and pending-action queue: protects the system from
//! acting on an inconsistent or not-yet-loaded state. Early interactions
//! are buffered and replayed in order once the bootstrap finishes, so
//! they are never lost or double-applied.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::container::StateContainer;
use crate::presenter::StoreSignal;
use crate::CoreResult;

/// A deferred zero-argument operation: a closure over already-captured
/// arguments, awaited during the drain.
pub type PendingAction =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send>> + Send>;

/// Box an async closure into a [`PendingAction`].
pub fn boxed_action<F, Fut>(f: F) -> PendingAction
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = CoreResult<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Computes whether the system may accept user-driven mutations yet.
///
/// Detached (no container attached) means not ready. An anonymous session
/// is ready as soon as the container exists — offline mode never blocks.
/// An authenticated session is ready only once the initial load completed.
pub struct ReadinessGate {
    container: RwLock<Option<Arc<StateContainer>>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            container: RwLock::new(None),
        }
    }

    pub fn attach(&self, container: Arc<StateContainer>) {
        *self
            .container
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(container);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        let guard = self
            .container
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(container) = guard.as_ref() else {
            return false;
        };
        if is_null_or_missing(container.get_path("identity")) {
            return true;
        }
        container
            .get_path("syncMeta.isInitialLoadComplete")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Append-only FIFO of deferred actions. An action is taken off the list
/// only when its execution starts, and each is awaited before the next so
/// actions observe the effects of all prior actions.
pub struct PendingActionQueue {
    queue: Mutex<VecDeque<PendingAction>>,
    draining: AtomicBool,
    signals: broadcast::Sender<StoreSignal>,
}

impl PendingActionQueue {
    #[must_use]
    pub fn new(signals: broadcast::Sender<StoreSignal>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            signals,
        }
    }

    pub fn queue_action(&self, action: PendingAction) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(action);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Drain the queue in FIFO order. Only one drain runs at a time; a
    /// failing action is logged and does not abort the rest. After the
    /// list empties, a full UI-state resync is signalled so any visual
    /// shortcut applied while queued is corrected from authoritative
    /// state.
    pub async fn process_pending(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut drained = 0usize;
        loop {
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(action) = next else {
                break;
            };
            drained += 1;
            if let Err(e) = action().await {
                warn!(error = %e, "queued action failed; continuing drain");
            }
        }

        self.draining.store(false, Ordering::SeqCst);
        if drained > 0 {
            info!(drained, "pending actions replayed");
            let _ = self.signals.send(StoreSignal::FullyReady);
        }
    }
}

fn is_null_or_missing(value: Option<Value>) -> bool {
    value.is_none_or(|v| v.is_null())
}
