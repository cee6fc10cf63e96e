use thiserror::Error;

use crate::{Collection, OperationId, StockUnit, Version};

/// Identifies the record a conditional write was aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef {
    /// A stock record.
    Stock(StockUnit),
    /// A versioned document.
    Document(Collection, uuid::Uuid),
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordRef::Stock(unit) => write!(f, "stock {unit}"),
            RecordRef::Document(collection, id) => write!(f, "{collection} {id}"),
        }
    }
}

/// Errors that can occur when interacting with the inventory store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write lost a race: the record's version was not the
    /// expected one when the unit of work was committed.
    #[error("Concurrency conflict on {record}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        record: RecordRef,
        expected: Version,
        actual: Version,
    },

    /// A journal entry with the same operation id already exists.
    #[error("Ledger entry already recorded: {0}")]
    DuplicateEntry(OperationId),

    /// The unit of work was rejected before reaching storage.
    #[error("Invalid unit of work: {0}")]
    InvalidUnitOfWork(String),

    /// The store could not be reached or aborted the commit.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if the failure is transient infrastructure trouble that
    /// the caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Returns true if the error means another writer got there first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrencyConflict { .. } | StoreError::DuplicateEntry(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
