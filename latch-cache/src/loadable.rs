//! Read outcomes.

use latch_core::{LatchError, LatchResult};

use crate::placeholder::Placeholder;

/// Outcome of a synchronous read.
///
/// `Pending` is the suspension signal: the caller waits on the placeholder and
/// reads again once it settles.
#[derive(Debug)]
pub enum Loadable<T> {
    Ready(T),
    Pending(Placeholder),
    Failed(LatchError),
}

impl<T> Loadable<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Loadable::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Loadable::Pending(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Loadable::Failed(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Loadable::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn placeholder(&self) -> Option<&Placeholder> {
        match self {
            Loadable::Pending(placeholder) => Some(placeholder),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LatchError> {
        match self {
            Loadable::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// `Ok(Some)` when ready, `Ok(None)` while pending.
    pub fn into_result(self) -> LatchResult<Option<T>> {
        match self {
            Loadable::Ready(value) => Ok(Some(value)),
            Loadable::Pending(_) => Ok(None),
            Loadable::Failed(error) => Err(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loadable<U> {
        match self {
            Loadable::Ready(value) => Loadable::Ready(f(value)),
            Loadable::Pending(placeholder) => Loadable::Pending(placeholder),
            Loadable::Failed(error) => Loadable::Failed(error),
        }
    }
}

impl<T> From<LatchError> for Loadable<T> {
    fn from(error: LatchError) -> Self {
        Loadable::Failed(error)
    }
}
