//! Domain error types.

use stock_store::{Collection, StoreError};
use thiserror::Error;
use uuid::Uuid;

use crate::{order::OrderError, transfer::TransferError, warehouse::WarehouseError};

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the inventory store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An order rule was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A warehouse rule was violated.
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// A transfer rule was violated.
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Record not found.
    #[error("Record not found: {collection} with id {id}")]
    NotFound { collection: Collection, id: Uuid },

    /// A document was decoded as a record of another collection.
    #[error("Expected a document from {expected}, got one from {actual}")]
    WrongCollection {
        expected: Collection,
        actual: Collection,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
