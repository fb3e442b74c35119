//! Request fingerprints: the keys of the result cache and request registry.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{canonical_json, Fragment, FragmentRef, Request, Variables};

/// Stable identity of a cacheable read.
///
/// Two fingerprints are equal iff a result cached under one is valid to serve
/// for the other. Built from the request identifier and the canonical variable
/// JSON, or for fragments from the fragment name, the referenced data ids and
/// the variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Wrap an already-computed fingerprint string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Fingerprint of a query read.
    pub fn for_request(request: &Request, variables: &Variables) -> Self {
        Self(format!(
            "{}{}",
            request.identifier(),
            variables.canonical_json()
        ))
    }

    /// Fingerprint of a fragment read over the records in `reference`.
    pub fn for_fragment(fragment: &Fragment, reference: &FragmentRef, variables: &Variables) -> Self {
        let data_ids = match reference {
            FragmentRef::Singular(entity) => Value::String(entity.id.to_string()),
            FragmentRef::Plural(entities) => Value::Array(
                entities
                    .iter()
                    .map(|e| Value::String(e.id.to_string()))
                    .collect(),
            ),
        };
        let key = json!({
            "dataIDs": data_ids,
            "variables": Value::from(variables.clone()),
        });
        Self(format!("{}-{}", fragment.name, canonical_json(&key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short hex digest, convenient for log fields.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(&hash[..6])
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
