//! Error types for latch operations

use crate::RequestFingerprint;
use thiserror::Error;

/// Read-path errors.
///
/// `NotAvailable` and `UnresolvedSelector` are caller configuration errors and
/// `MissingFragmentRef` is a broken invariant. None of them are transient, so
/// retrying the same read without changing its inputs fails the same way.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("Data for {fingerprint} is not available and not being fetched")]
    NotAvailable { fingerprint: RequestFingerprint },

    #[error("Fragment {fragment} could not resolve a selector from the ref passed as `{key}`")]
    UnresolvedSelector { fragment: String, key: String },

    #[error("Fragment {fragment} has missing data and parent request {parent} is not in flight")]
    MissingFragmentData {
        fragment: String,
        parent: RequestFingerprint,
    },

    #[error("No fragment ref supplied for declared key `{key}`")]
    MissingFragmentRef { key: String },
}

/// Errors delivered by the network layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Request {operation} returned errors: {messages:?}")]
    ResponseErrors {
        operation: String,
        messages: Vec<String>,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("No async runtime available for {component}")]
    RuntimeUnavailable { component: String },
}

/// Master error type for all latch errors.
///
/// Cloneable because a single network failure is handed to every reader of the
/// failed fingerprint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LatchError {
    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LatchError {
    /// Returns true if the error came from the network layer.
    pub fn is_network(&self) -> bool {
        matches!(self, LatchError::Fetch(_))
    }
}

/// Result type alias for latch operations.
pub type LatchResult<T> = Result<T, LatchError>;

// =============================================================================
// TESTS
// =============================================================================
