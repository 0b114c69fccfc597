//! Storage - Embedded persistence, one SQLite file per brain
//!
//! The store keeps a writer and a reader connection (WAL) so one logical
//! writer can proceed alongside many readers. All writes from a retrieval
//! are collected in a [`DeferredWriteBatch`] and applied in one
//! transaction after the result is produced.

mod deferred;
mod migrations;
mod sqlite;

pub use deferred::{CoActivationEvent, DeferredWriteBatch, SynapseDelta};
pub use migrations::{apply_migrations, current_version, LATEST_SCHEMA_VERSION};
pub use sqlite::{ActionEvent, Store, StoreStats};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Schema or row integrity failure; the brain must be rechecked before
    /// further writes
    #[error("Storage integrity error: {0}")]
    Corrupt(String),
    /// Contention beyond the retry budget
    #[error("Store busy: {0}")]
    Busy(String),
    /// Invalid stored timestamp
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StoreError>;
