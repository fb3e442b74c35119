//! Delayed task scheduling.
//!
//! Retention windows are timed through a [`Scheduler`] so they can run on a
//! tokio runtime in production and on a virtual clock in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use latch_core::{ConfigError, Disposable, LatchResult};
use tokio::runtime::Handle;

use crate::lock;

/// A boxed one-shot task.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs a task after a delay. Disposing the returned handle cancels the task
/// if it has not run yet.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> Disposable;
}

// ============================================================================
// TOKIO
// ============================================================================

/// Scheduler backed by `tokio::time::sleep` on a runtime handle.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    pub fn from_current() -> LatchResult<Self> {
        Handle::try_current().map(Self::new).map_err(|_| {
            ConfigError::RuntimeUnavailable {
                component: "TokioScheduler".to_string(),
            }
            .into()
        })
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Disposable {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Disposable::new(move || join.abort())
    }
}

// ============================================================================
// MANUAL
// ============================================================================

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    tasks: BTreeMap<(Duration, u64), Task>,
}

/// Scheduler driven by an explicit virtual clock.
///
/// Nothing runs until [`ManualScheduler::advance`] moves the clock past a
/// task's due time. Tasks due at the same instant run in scheduling order.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the virtual clock.
    pub fn now(&self) -> Duration {
        lock(&self.inner).now
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.inner).tasks.len()
    }

    /// Move the clock forward, running every task that falls due.
    pub fn advance(&self, by: Duration) {
        let target = lock(&self.inner).now + by;
        loop {
            let due = {
                let mut state = lock(&self.inner);
                match state.tasks.keys().next().copied() {
                    Some(key) if key.0 <= target => {
                        state.now = key.0;
                        state.tasks.remove(&key)
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };
            // Tasks may schedule or cancel other tasks, so run them unlocked.
            match due {
                Some(task) => task(),
                None => break,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Disposable {
        let key = {
            let mut state = lock(&self.inner);
            state.next_id += 1;
            let key = (state.now + delay, state.next_id);
            state.tasks.insert(key, task);
            key
        };
        let inner = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner).tasks.remove(&key);
            }
        })
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner);
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.tasks.len())
            .finish()
    }
}
