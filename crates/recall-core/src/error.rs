//! ============================================================================
//! Error Types - Failure taxonomy for reconciliation runs
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Errors surfaced by the reconciliation engine and its collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum MemoryError {
    /// The structured-output call gave up after its retry policy
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Store read failed: {0}")]
    StoreRead(String),

    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// Namespace template could not be resolved for this run
    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MemoryError {
    /// Whether this error came from the store collaborator
    pub fn is_store_error(&self) -> bool {
        matches!(self, MemoryError::StoreRead(_) | MemoryError::StoreWrite(_))
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
