//! Error types for cyclr
//!
//! Centralized error handling using thiserror. Collaborator failures never show up
//! here: they are classified into outcomes before the state machine sees them.

use thiserror::Error;

/// All error types that can occur in cyclr
#[derive(Debug, Error)]
pub enum CyclrError {
    /// No persisted cycle for the issue
    #[error("Cycle not found: {0}")]
    CycleNotFound(String),

    /// Attempted illegal transition or broken cycle invariant. Always a defect.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Another driver holds an unexpired lease on the cycle
    #[error("Lease on {issue_id} held by {owner} until {expires_at}")]
    LeaseHeld {
        issue_id: String,
        owner: String,
        expires_at: String,
    },

    /// Our lease expired and was taken over before we could commit
    #[error("Lease lost: {0}")]
    LeaseLost(String),

    /// Collaborator backend could not be constructed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for cyclr operations
pub type Result<T> = std::result::Result<T, CyclrError>;
