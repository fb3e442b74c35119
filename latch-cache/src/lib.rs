//! latch Cache - Suspense Data Cache Engine
//!
//! Mediates between declarative query and fragment reads, a normalized store
//! and a network layer, both supplied through [`Environment`]:
//!
//! - a bounded LRU [`ResultCache`] of pending, fulfilled and failed reads
//! - a [`RequestRegistry`] that runs at most one network request per
//!   fingerprint and replays its events to late subscribers
//! - [`RetentionTimers`] that release fetched data after a grace window
//! - the fetch-policy decision table ([`decide`])
//!
//! [`DataCache`] ties these together for one environment and
//! [`EnvironmentCaches`] hands out one cache per environment.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod data_cache;
mod environment;
mod environments;
mod loadable;
mod placeholder;
mod policy;
mod registry;
mod result_cache;
mod retention;
mod scheduler;

pub use data_cache::{DataCache, FragmentRefs, FragmentResult, FragmentSpec, QueryResult};
pub use environment::Environment;
pub use environments::EnvironmentCaches;
pub use loadable::Loadable;
pub use placeholder::{Placeholder, Settlement};
pub use policy::{decide, FetchDecision};
pub use registry::{EventSink, Observer, RequestEvent, RequestRegistry, RequestSubscription};
pub use result_cache::{CacheEntry, CacheStats, ResultCache};
pub use retention::{RetentionTimers, RetentionWindow, WindowId};
pub use scheduler::{ManualScheduler, Scheduler, Task, TokioScheduler};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
