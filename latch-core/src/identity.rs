//! Identity types: environments, records, requests and fragments.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::RequestFingerprint;

/// Data id of the store's root record; query selectors start here.
pub const ROOT_ID: &str = "client:root";

/// Identity of one store/network environment.
///
/// Each environment owns exactly one result cache and one in-flight registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentId(Uuid);

impl EnvironmentId {
    /// Generate a new timestamp-sortable environment id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EnvironmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a normalized record in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(String);

impl DataId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The store's root record.
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DataId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DataId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A compiled query/operation as seen by the cache.
///
/// Only identity matters here: the persisted id when the operation was
/// persisted, otherwise a hash of the operation text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    pub name: String,
    pub id: Option<String>,
    pub cache_id: String,
}

impl Request {
    /// Describe an operation by name and text; the cache id hashes the text.
    pub fn new(name: impl Into<String>, text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self {
            name: name.into(),
            id: None,
            cache_id: hex::encode(&digest[..16]),
        }
    }

    /// Describe a persisted operation known to the server by `id`.
    pub fn persisted(name: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: name.into(),
            cache_id: id.clone(),
            id: Some(id),
        }
    }

    /// Identity used for fingerprinting: persisted id, else cache id.
    pub fn identifier(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.cache_id)
    }
}

/// A fragment definition as seen by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fragment {
    pub name: String,
    /// Plural fragments spread onto a list of records.
    pub plural: bool,
}

impl Fragment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plural: false,
        }
    }

    pub fn plural(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plural: true,
        }
    }
}

/// Reference to one record that fragments were spread onto.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: DataId,
    /// Names of the fragments spread onto this record by the parent.
    pub fragments: BTreeSet<String>,
    /// Fingerprint of the request that fetched the record, if known.
    pub owner: Option<RequestFingerprint>,
}

impl EntityRef {
    pub fn new(id: impl Into<DataId>) -> Self {
        Self {
            id: id.into(),
            fragments: BTreeSet::new(),
            owner: None,
        }
    }

    /// Mark `fragment` as spread onto this record.
    pub fn spreading(mut self, fragment: impl Into<String>) -> Self {
        self.fragments.insert(fragment.into());
        self
    }

    pub fn owned_by(mut self, owner: RequestFingerprint) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn spreads(&self, fragment: &str) -> bool {
        self.fragments.contains(fragment)
    }
}

/// The value a parent passes for a fragment key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentRef {
    Singular(EntityRef),
    Plural(Vec<EntityRef>),
}

impl FragmentRef {
    /// Data ids of every referenced record, in order.
    pub fn data_ids(&self) -> Vec<&DataId> {
        match self {
            FragmentRef::Singular(entity) => vec![&entity.id],
            FragmentRef::Plural(entities) => entities.iter().map(|e| &e.id).collect(),
        }
    }
}

impl From<EntityRef> for FragmentRef {
    fn from(entity: EntityRef) -> Self {
        FragmentRef::Singular(entity)
    }
}
