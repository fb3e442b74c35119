//! Bounded result cache.
//!
//! Maps request fingerprints to the state of their read: pending, fulfilled
//! or failed. Capacity is fixed; `get` and `set` mark an entry most recently
//! used and inserting past capacity evicts the least recently used entry.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use latch_core::{LatchError, RequestFingerprint, SnapshotSet};
use lru::LruCache;

use crate::lock;
use crate::placeholder::Placeholder;

/// State of one cached read. At most one entry exists per fingerprint.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// Data is available.
    Fulfilled { snapshot: SnapshotSet },
    /// An operation is outstanding; the placeholder settles when it lands.
    Pending { placeholder: Placeholder },
    /// The operation failed; served to every reader until invalidated.
    Failed { error: LatchError },
}

impl CacheEntry {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, CacheEntry::Fulfilled { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CacheEntry::Pending { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CacheEntry::Failed { .. })
    }

    fn is_pending_on(&self, placeholder: &Placeholder) -> bool {
        matches!(self, CacheEntry::Pending { placeholder: p } if p.ptr_eq(placeholder))
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get` calls that found an entry.
    pub hits: u64,
    /// Number of `get` calls that found nothing.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct ResultCacheState {
    entries: LruCache<RequestFingerprint, CacheEntry>,
    stats: CacheStats,
}

/// Fixed-capacity LRU map from fingerprint to [`CacheEntry`].
///
/// Cloning shares the underlying map. Every write replaces the whole entry
/// under one lock, so readers never observe a partial update.
#[derive(Debug, Clone)]
pub struct ResultCache {
    inner: Arc<Mutex<ResultCacheState>>,
}

impl ResultCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ResultCacheState {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            })),
        }
    }

    /// Look up an entry and mark it most recently used.
    pub fn get(&self, fingerprint: &RequestFingerprint) -> Option<CacheEntry> {
        let mut state = lock(&self.inner);
        let entry = state.entries.get(fingerprint).cloned();
        if entry.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        entry
    }

    /// Look up an entry without touching recency or statistics.
    pub fn peek(&self, fingerprint: &RequestFingerprint) -> Option<CacheEntry> {
        lock(&self.inner).entries.peek(fingerprint).cloned()
    }

    /// Insert or replace an entry and mark it most recently used.
    pub fn set(&self, fingerprint: RequestFingerprint, entry: CacheEntry) {
        let mut state = lock(&self.inner);
        if let Some((displaced, _)) = state.entries.push(fingerprint.clone(), entry) {
            if displaced != fingerprint {
                state.stats.evictions += 1;
                tracing::trace!(evicted = %displaced.digest(), "Evicted least recently used entry");
            }
        }
    }

    pub fn has(&self, fingerprint: &RequestFingerprint) -> bool {
        lock(&self.inner).entries.contains(fingerprint)
    }

    /// Remove an entry. Returns true if one was present.
    pub fn delete(&self, fingerprint: &RequestFingerprint) -> bool {
        lock(&self.inner).entries.pop(fingerprint).is_some()
    }

    /// Replace the entry only while it is still pending on `placeholder`.
    ///
    /// Used by completion callbacks so a late settlement never overwrites an
    /// entry that was invalidated or re-set in the meantime.
    pub fn replace_if_pending(
        &self,
        fingerprint: &RequestFingerprint,
        placeholder: &Placeholder,
        entry: CacheEntry,
    ) -> bool {
        let mut state = lock(&self.inner);
        let pending = state
            .entries
            .peek(fingerprint)
            .is_some_and(|current| current.is_pending_on(placeholder));
        if pending {
            state.entries.put(fingerprint.clone(), entry);
        }
        pending
    }

    /// Remove the entry only while it is still pending on `placeholder`.
    pub fn remove_if_pending(&self, fingerprint: &RequestFingerprint, placeholder: &Placeholder) -> bool {
        let mut state = lock(&self.inner);
        let pending = state
            .entries
            .peek(fingerprint)
            .is_some_and(|current| current.is_pending_on(placeholder));
        if pending {
            state.entries.pop(fingerprint);
        }
        pending
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock(&self.inner).entries.cap().get()
    }

    pub fn clear(&self) {
        lock(&self.inner).entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.inner);
        CacheStats {
            entry_count: state.entries.len() as u64,
            ..state.stats.clone()
        }
    }
}
