//! Engine error taxonomy
//!
//! Boundary errors carry a stable kind plus a context string and nothing
//! else; internal errors map onto these five kinds at the edge.

use crate::storage::StoreError;

/// Error kinds surfaced by public engine operations
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Missing brain, fiber or neuron
    #[error("Not found: {0}")]
    NotFound(String),
    /// Schema or field validation failure; nothing was persisted
    #[error("Invalid input: {0}")]
    Invalid(String),
    /// Version or constraint conflict
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Contention beyond the retry budget; safe to retry
    #[error("Busy: {0}")]
    Busy(String),
    /// Internal failure; the operation did not complete
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(s) => EngineError::NotFound(s),
            StoreError::Busy(s) => EngineError::Busy(s),
            StoreError::Corrupt(s) => EngineError::Internal(format!("storage integrity: {s}")),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// TESTS
// ============================================================================
