//! Disposable handles.

use std::fmt;

/// A one-shot release action: cancel a request, release a retain, stop a timer.
///
/// `dispose` runs the action at most once. Dropping a `Disposable` without
/// disposing it does nothing; releasing is always explicit.
#[must_use = "a Disposable does nothing unless disposed"]
pub struct Disposable {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposable {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { action: None }
    }

    /// Dispose every handle in order, as one handle.
    ///
    /// Inactive handles are dropped; if none is left the result is `noop`.
    pub fn all(disposables: Vec<Disposable>) -> Self {
        let disposables: Vec<Disposable> = disposables
            .into_iter()
            .filter(Disposable::is_active)
            .collect();
        if disposables.is_empty() {
            return Self::noop();
        }
        Self::new(move || {
            for mut disposable in disposables {
                disposable.dispose();
            }
        })
    }

    pub fn dispose(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }

    /// True until the action has run (always false for `noop`).
    pub fn is_active(&self) -> bool {
        self.action.is_some()
    }
}

impl Default for Disposable {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("active", &self.is_active())
            .finish()
    }
}
