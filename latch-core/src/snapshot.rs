//! Store snapshots.

use serde_json::Value;
use std::sync::Arc;

use crate::Selector;

/// Result of reading a selector from the store.
///
/// The data is shared behind an `Arc`: a cached snapshot is handed to every
/// reader of its fingerprint and must never be mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    selector: Selector,
    data: Arc<Value>,
    is_missing_data: bool,
}

impl Snapshot {
    pub fn new(selector: Selector, data: Value, is_missing_data: bool) -> Self {
        Self {
            selector,
            data: Arc::new(data),
            is_missing_data,
        }
    }

    /// Snapshot with every selected field present.
    pub fn complete(selector: Selector, data: Value) -> Self {
        Self::new(selector, data, false)
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<Value> {
        Arc::clone(&self.data)
    }

    pub fn is_missing_data(&self) -> bool {
        self.is_missing_data
    }
}

/// One snapshot for singular reads, one per record for plural fragments.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotSet {
    Singular(Snapshot),
    Plural(Vec<Snapshot>),
}

impl SnapshotSet {
    /// True if any contained snapshot has missing data.
    pub fn has_missing_data(&self) -> bool {
        match self {
            SnapshotSet::Singular(snapshot) => snapshot.is_missing_data(),
            SnapshotSet::Plural(snapshots) => snapshots.iter().any(Snapshot::is_missing_data),
        }
    }

    /// Data of the set: the snapshot's data, or an array for plural sets.
    pub fn data(&self) -> Value {
        match self {
            SnapshotSet::Singular(snapshot) => snapshot.data().clone(),
            SnapshotSet::Plural(snapshots) => {
                Value::Array(snapshots.iter().map(|s| s.data().clone()).collect())
            }
        }
    }

    /// Shared data: the snapshot's own allocation for singular sets.
    pub fn shared_data(&self) -> Arc<Value> {
        match self {
            SnapshotSet::Singular(snapshot) => snapshot.shared_data(),
            SnapshotSet::Plural(_) => Arc::new(self.data()),
        }
    }

    pub fn as_singular(&self) -> Option<&Snapshot> {
        match self {
            SnapshotSet::Singular(snapshot) => Some(snapshot),
            SnapshotSet::Plural(_) => None,
        }
    }
}

impl From<Snapshot> for SnapshotSet {
    fn from(snapshot: Snapshot) -> Self {
        SnapshotSet::Singular(snapshot)
    }
}
