//! Store and network collaborators.

use latch_core::{Disposable, EnvironmentId, OperationDescriptor, Selector, SelectorSet, Snapshot, SnapshotSet};

use crate::placeholder::Placeholder;
use crate::registry::EventSink;

/// The normalized store and network layer a [`DataCache`](crate::DataCache)
/// mediates between.
///
/// Implementations are shared across threads and called with no cache lock
/// held, so they may call back into the cache.
pub trait Environment: Send + Sync {
    /// Identity used to key per-environment caches.
    fn id(&self) -> EnvironmentId;

    /// True if the operation's full data is present in the store. May run the
    /// store's missing-data handlers as a side effect.
    fn check(&self, operation: &OperationDescriptor) -> bool;

    /// Read a selector from the store.
    fn lookup(&self, selector: &Selector) -> Snapshot;

    /// Start a network request, publishing payloads to the store before
    /// delivering them to `sink`. The returned handle aborts the request.
    fn execute(&self, operation: &OperationDescriptor, sink: EventSink) -> Disposable;

    /// Keep the operation's data from being garbage collected until disposed.
    fn retain(&self, operation: &OperationDescriptor) -> Disposable;

    /// A request for `operation` started outside this cache, if any.
    fn in_flight_request(&self, _operation: &OperationDescriptor) -> Option<Placeholder> {
        None
    }
}

/// Read every selector of a set.
pub(crate) fn lookup_set(environment: &dyn Environment, selectors: &SelectorSet) -> SnapshotSet {
    match selectors {
        SelectorSet::Singular(selector) => SnapshotSet::Singular(environment.lookup(selector)),
        SelectorSet::Plural(selectors) => {
            SnapshotSet::Plural(selectors.iter().map(|s| environment.lookup(s)).collect())
        }
    }
}
