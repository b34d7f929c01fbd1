//! Error taxonomy of the memory subsystem.

use brainvault_types::{Category, ValidationError};
use thiserror::Error;

use crate::consolidation::{ConsolidationStep, ConsolidationSummary};

/// Errors that can arise from Brain operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Out-of-range score, malformed category or empty field.  No write
    /// happened.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Point lookup miss.  Callers decide whether this is fatal.
    #[error("not found: {category}/{key}")]
    NotFound { category: Category, key: String },

    /// Raw storage failure surfaced by the entity store.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Storage failure wrapped with the operation that was being attempted.
    #[error("{operation} failed: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("payload serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A consolidation pass was stopped between chunks.  Everything in
    /// `partial` is already committed; the next pass picks up the rest.
    #[error("consolidation interrupted during {step}")]
    ConsolidationInterrupted {
        step: ConsolidationStep,
        partial: ConsolidationSummary,
    },

    #[error("store lock poisoned by a panicking writer")]
    LockPoisoned,
}

impl MemoryError {
    pub(crate) fn not_found(category: Category, key: impl ToString) -> Self {
        MemoryError::NotFound {
            category,
            key: key.to_string(),
        }
    }

    /// Attach the attempted operation to a raw storage error.  Other variants
    /// pass through untouched.
    pub fn during(self, operation: &'static str) -> Self {
        match self {
            MemoryError::Sqlite(source) => MemoryError::Storage { operation, source },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoryError::NotFound { .. })
    }

    /// `true` for errors the caller can recover from without intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MemoryError::NotFound { .. } | MemoryError::ConsolidationInterrupted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
