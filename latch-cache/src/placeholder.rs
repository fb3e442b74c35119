//! Suspension placeholders.
//!
//! A [`Placeholder`] stands in for data that is not available yet. It settles
//! exactly once, either resolved (retry the read) or rejected with the error
//! that every reader should see. Waiters can register a callback or `await`
//! the settlement.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use latch_core::LatchError;
use tokio::sync::Notify;

use crate::lock;

/// How a placeholder settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Data arrived or the wait was abandoned; readers should retry.
    Resolved,
    /// The operation failed.
    Rejected(LatchError),
}

type SettleCallback = Box<dyn FnOnce(&Settlement) + Send>;

struct PlaceholderState {
    settlement: Option<Settlement>,
    callbacks: Vec<SettleCallback>,
}

struct PlaceholderInner {
    id: u64,
    state: Mutex<PlaceholderState>,
    notify: Notify,
}

static NEXT_PLACEHOLDER_ID: AtomicU64 = AtomicU64::new(1);

/// Shared, settle-once completion handle. Clones observe the same settlement.
#[derive(Clone)]
pub struct Placeholder {
    inner: Arc<PlaceholderInner>,
}

impl Placeholder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PlaceholderInner {
                id: NEXT_PLACEHOLDER_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(PlaceholderState {
                    settlement: None,
                    callbacks: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Settle as resolved. Returns false if already settled.
    pub fn resolve(&self) -> bool {
        self.settle(Settlement::Resolved)
    }

    /// Settle as rejected. Returns false if already settled.
    pub fn reject(&self, error: LatchError) -> bool {
        self.settle(Settlement::Rejected(error))
    }

    fn settle(&self, settlement: Settlement) -> bool {
        let callbacks = {
            let mut state = lock(&self.inner.state);
            if state.settlement.is_some() {
                return false;
            }
            state.settlement = Some(settlement.clone());
            std::mem::take(&mut state.callbacks)
        };

        tracing::trace!(placeholder = self.inner.id, ?settlement, "Placeholder settled");
        self.inner.notify.notify_waiters();
        for callback in callbacks {
            callback(&settlement);
        }
        true
    }

    /// Run `callback` once the placeholder settles; immediately if it already has.
    pub fn on_settled(&self, callback: impl FnOnce(&Settlement) + Send + 'static) {
        let settled = {
            let mut state = lock(&self.inner.state);
            match &state.settlement {
                Some(settlement) => settlement.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&settled);
    }

    pub fn settlement(&self) -> Option<Settlement> {
        lock(&self.inner.state).settlement.clone()
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.inner.state).settlement.is_some()
    }

    /// Wait until the placeholder settles.
    pub async fn wait(&self) -> Settlement {
        loop {
            // Register interest before checking, so a settle in between is not lost.
            let notified = self.inner.notify.notified();
            if let Some(settlement) = self.settlement() {
                return settlement;
            }
            notified.await;
        }
    }

    /// True if both handles refer to the same placeholder.
    pub fn ptr_eq(&self, other: &Placeholder) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Placeholder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Placeholder")
            .field("id", &self.inner.id)
            .field("settlement", &self.settlement())
            .finish()
    }
}
