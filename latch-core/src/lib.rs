//! latch Core - Data Types
//!
//! Pure data structures shared by the cache engine and its collaborators:
//! request and fragment identities, variables, selectors, store snapshots,
//! fetch/read policies, fingerprints, disposables, errors and configuration.
//! This crate contains no caching behaviour.

mod config;
mod disposable;
mod error;
mod fingerprint;
mod identity;
mod policy;
mod selector;
mod snapshot;
mod variables;

pub use config::{CacheConfig, DEFAULT_CAPACITY, DEFAULT_RETENTION_GRACE};
pub use disposable::Disposable;
pub use error::{ConfigError, FetchError, LatchError, LatchResult, ReadError};
pub use fingerprint::RequestFingerprint;
pub use identity::{DataId, EntityRef, EnvironmentId, Fragment, FragmentRef, Request, ROOT_ID};
pub use policy::{FetchPolicy, ReadOptions, ReadPolicy};
pub use selector::{OperationDescriptor, Selector, SelectorSet};
pub use snapshot::{Snapshot, SnapshotSet};
pub use variables::{canonical_json, Variables};
