//! Error types for chargeflow

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the charge calculation engine.
///
/// Carries only the engine's diagnostic message so it can be stored next to
/// a per-file result and shipped back to the caller unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors that can occur in chargeflow
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown file hash, computation id or record
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// User scope would exceed its quota; user data is never evicted
    #[error("Quota exceeded: {used} bytes used, {requested} bytes requested, quota is {quota} bytes")]
    QuotaExceeded { used: u64, requested: u64, quota: u64 },

    /// Guest scope could not free enough space by eviction
    #[error("Capacity exceeded: {requested} bytes requested, guest quota is {quota} bytes")]
    CapacityExceeded { requested: u64, quota: u64 },

    /// Charge engine failure
    #[error("Engine failure: {0}")]
    Engine(#[from] EngineError),

    /// Rejected input (disallowed extension, empty upload, oversized request)
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(format!("blocking task failed: {}", e))
    }
}
