//! Retention windows.
//!
//! When a fetch completes, the environment retain it held is moved into a
//! window that releases it after the configured grace. Reading the result does
//! not stop the window; a reader that has set up its own retention disposes
//! its claim to release the cache's hold early.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use latch_core::{Disposable, RequestFingerprint};
use tracing::debug;

use crate::lock;
use crate::scheduler::Scheduler;

/// Identifies one retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

/// A retain waiting for its grace period to end.
#[derive(Debug)]
pub struct RetentionWindow {
    pub fingerprint: RequestFingerprint,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    timer: Disposable,
    retention: Disposable,
}

#[derive(Debug, Default)]
struct TimersState {
    next_id: u64,
    windows: HashMap<WindowId, RetentionWindow>,
}

/// All open retention windows of one cache.
#[derive(Clone)]
pub struct RetentionTimers {
    inner: Arc<Mutex<TimersState>>,
    scheduler: Arc<dyn Scheduler>,
    grace: Duration,
}

impl RetentionTimers {
    pub fn new(scheduler: Arc<dyn Scheduler>, grace: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimersState::default())),
            scheduler,
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Hold `retention` for the grace period, then dispose it.
    pub fn start(&self, fingerprint: RequestFingerprint, retention: Disposable) -> WindowId {
        let started_at = Utc::now();
        let expires_at = started_at
            + chrono::Duration::from_std(self.grace).unwrap_or_else(|_| chrono::Duration::zero());

        let id = {
            let mut state = lock(&self.inner);
            state.next_id += 1;
            let id = WindowId(state.next_id);
            state.windows.insert(
                id,
                RetentionWindow {
                    fingerprint: fingerprint.clone(),
                    started_at,
                    expires_at,
                    timer: Disposable::noop(),
                    retention,
                },
            );
            id
        };

        let weak: Weak<Mutex<TimersState>> = Arc::downgrade(&self.inner);
        let timer = self.scheduler.schedule(
            self.grace,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    expire(&inner, id);
                }
            }),
        );

        let mut state = lock(&self.inner);
        if let Some(window) = state.windows.get_mut(&id) {
            window.timer = timer;
        }
        drop(state);

        debug!(fingerprint = %fingerprint.digest(), window = id.0, %expires_at, "Retention window opened");
        id
    }

    /// Close a window early and release its retain now.
    pub fn cancel(&self, id: WindowId) -> bool {
        let window = lock(&self.inner).windows.remove(&id);
        match window {
            Some(mut window) => {
                window.timer.dispose();
                window.retention.dispose();
                true
            }
            None => false,
        }
    }

    /// Close every window opened for `fingerprint`. Returns how many closed.
    pub fn cancel_fingerprint(&self, fingerprint: &RequestFingerprint) -> usize {
        let windows = self.take_windows(fingerprint);
        let closed = windows.len();
        for mut window in windows {
            window.timer.dispose();
            window.retention.dispose();
        }
        closed
    }

    /// Handle given to a reader of a fulfilled result.
    ///
    /// The windows open now keep running. Disposing the handle closes those
    /// still open and releases their retains immediately.
    pub fn claim(&self, fingerprint: &RequestFingerprint) -> Disposable {
        let ids: Vec<WindowId> = lock(&self.inner)
            .windows
            .iter()
            .filter(|(_, window)| &window.fingerprint == fingerprint)
            .map(|(id, _)| *id)
            .collect();
        if ids.is_empty() {
            return Disposable::noop();
        }

        let timers = self.clone();
        let fingerprint = fingerprint.clone();
        Disposable::new(move || {
            let closed = ids.into_iter().filter(|id| timers.cancel(*id)).count();
            debug!(fingerprint = %fingerprint.digest(), closed, "Retention released by reader");
        })
    }

    fn take_windows(&self, fingerprint: &RequestFingerprint) -> Vec<RetentionWindow> {
        let mut state = lock(&self.inner);
        let ids: Vec<WindowId> = state
            .windows
            .iter()
            .filter(|(_, window)| &window.fingerprint == fingerprint)
            .map(|(id, _)| *id)
            .collect();
        ids.iter().filter_map(|id| state.windows.remove(id)).collect()
    }

    pub fn expires_at(&self, id: WindowId) -> Option<DateTime<Utc>> {
        lock(&self.inner).windows.get(&id).map(|window| window.expires_at)
    }

    pub fn is_open(&self, id: WindowId) -> bool {
        lock(&self.inner).windows.contains_key(&id)
    }

    /// Number of open windows for `fingerprint`.
    pub fn open_for(&self, fingerprint: &RequestFingerprint) -> usize {
        lock(&self.inner)
            .windows
            .values()
            .filter(|window| &window.fingerprint == fingerprint)
            .count()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn expire(inner: &Mutex<TimersState>, id: WindowId) {
    let window = lock(inner).windows.remove(&id);
    if let Some(mut window) = window {
        debug!(fingerprint = %window.fingerprint.digest(), window = id.0, "Retention window elapsed");
        window.retention.dispose();
    }
}

impl fmt::Debug for RetentionTimers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionTimers")
            .field("grace", &self.grace)
            .field("open", &self.len())
            .finish()
    }
}
