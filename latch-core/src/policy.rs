//! Fetch and read policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// FETCH POLICY
// ============================================================================

/// Whether a read may consult the local store and whether it may hit the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Read the store, never fetch.
    StoreOnly,
    /// Read the store, fetch only if the store cannot fulfil the request.
    StoreOrNetwork,
    /// Read the store and always fetch.
    StoreAndNetwork,
    /// Skip the store and always fetch.
    #[default]
    NetworkOnly,
}

impl FetchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchPolicy::StoreOnly => "store-only",
            FetchPolicy::StoreOrNetwork => "store-or-network",
            FetchPolicy::StoreAndNetwork => "store-and-network",
            FetchPolicy::NetworkOnly => "network-only",
        }
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "storeonly" => Ok(FetchPolicy::StoreOnly),
            "storeornetwork" => Ok(FetchPolicy::StoreOrNetwork),
            "storeandnetwork" => Ok(FetchPolicy::StoreAndNetwork),
            "networkonly" => Ok(FetchPolicy::NetworkOnly),
            _ => Err(format!("Invalid FetchPolicy: {}", s)),
        }
    }
}

// ============================================================================
// READ POLICY
// ============================================================================

/// How much of a local read must be present before it is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadPolicy {
    /// Serve partial local data.
    Eager,
    /// Serve local data only when nothing is missing.
    #[default]
    Lazy,
}

impl ReadPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPolicy::Eager => "eager",
            ReadPolicy::Lazy => "lazy",
        }
    }

    /// Whether a snapshot with missing data may be cached and served.
    pub fn accepts_partial(&self) -> bool {
        matches!(self, ReadPolicy::Eager)
    }
}

impl fmt::Display for ReadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "eager" => Ok(ReadPolicy::Eager),
            "lazy" => Ok(ReadPolicy::Lazy),
            _ => Err(format!("Invalid ReadPolicy: {}", s)),
        }
    }
}

fn normalize_token(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ============================================================================
// READ OPTIONS
// ============================================================================

/// Policies for one read or fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadOptions {
    pub fetch_policy: FetchPolicy,
    pub read_policy: ReadPolicy,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_policy(mut self, fetch_policy: FetchPolicy) -> Self {
        self.fetch_policy = fetch_policy;
        self
    }

    pub fn with_read_policy(mut self, read_policy: ReadPolicy) -> Self {
        self.read_policy = read_policy;
        self
    }

    pub fn store_only() -> Self {
        Self::new().with_fetch_policy(FetchPolicy::StoreOnly)
    }
}
