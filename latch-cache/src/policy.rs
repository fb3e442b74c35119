//! Fetch decision table.

use latch_core::{FetchPolicy, ReadOptions, SnapshotSet};

/// What one fetch call does, derived from its [`ReadOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchDecision {
    /// Attempt a local store read first.
    pub read_locally: bool,
    /// Start (or join) a network request.
    pub should_fetch: bool,
    /// Accept and cache a local read even when it has missing data.
    pub accept_partial: bool,
}

impl FetchDecision {
    /// Whether a local read may be written to the cache.
    pub fn accepts(&self, snapshot: &SnapshotSet) -> bool {
        self.read_locally && (self.accept_partial || !snapshot.has_missing_data())
    }
}

/// Apply the policy table.
///
/// `fully_available` is consulted only for `store-or-network`, and at most
/// once per call; it may have store side effects.
pub fn decide(options: ReadOptions, fully_available: impl FnOnce() -> bool) -> FetchDecision {
    let (read_locally, should_fetch) = match options.fetch_policy {
        FetchPolicy::StoreOnly => (true, false),
        FetchPolicy::StoreOrNetwork => (true, !fully_available()),
        FetchPolicy::StoreAndNetwork => (true, true),
        FetchPolicy::NetworkOnly => (false, true),
    };
    FetchDecision {
        read_locally,
        should_fetch,
        accept_partial: options.read_policy.accepts_partial(),
    }
}
