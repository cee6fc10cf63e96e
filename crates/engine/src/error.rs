//! Engine error types.

use std::time::Duration;

use common::{OrderId, TransferId, WarehouseId};
use domain::{DomainError, OrderError, TransferError, WarehouseError};
use stock_store::{MovementKind, Reference, StockUnit, StoreError};
use thiserror::Error;

/// Coarse classification of an [`EngineError`], stable for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InsufficientStock,
    InactiveWarehouse,
    InvalidTransfer,
    NotFound,
    ConcurrencyConflict,
    StoreUnavailable,
    InvalidState,
    InvalidInput,
    OutcomeUnknown,
    Internal,
}

impl ErrorKind {
    /// Returns true if the caller's request was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::InsufficientStock
                | ErrorKind::InactiveWarehouse
                | ErrorKind::InvalidTransfer
                | ErrorKind::InvalidInput
                | ErrorKind::InvalidState
                | ErrorKind::NotFound
        )
    }
}

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Not enough available stock to reserve or debit.
    #[error("Insufficient stock for {unit}: requested {requested}, available {available}")]
    InsufficientStock {
        unit: StockUnit,
        requested: u64,
        available: u64,
    },

    /// A release or commit found fewer reserved units than it was asked to
    /// settle. This means the counters disagree with the journal.
    #[error("Insufficient reserved stock for {unit}: requested {requested}, reserved {reserved}")]
    InsufficientReserved {
        unit: StockUnit,
        requested: u64,
        reserved: u64,
    },

    /// The reference was already settled the other way (a release after a
    /// commit, or a commit after a release).
    #[error("Reservation {reference} was already settled by {settled_by}")]
    AlreadySettled {
        reference: Reference,
        settled_by: MovementKind,
    },

    /// A release or commit names a reservation that was never made, or
    /// does not match it.
    #[error("No matching reservation for {reference}: {reason}")]
    NoReservation {
        reference: Reference,
        reason: String,
    },

    #[error("Warehouse {0} is not active")]
    InactiveWarehouse(WarehouseId),

    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Conflicts persisted after every retry.
    #[error("Concurrency conflict persisted after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A deadline elapsed before the call finished; it may or may not have
    /// taken effect.
    #[error("Outcome unknown: deadline of {0:?} elapsed")]
    OutcomeUnknown(Duration),

    /// A manual sweep was requested while another pass was running.
    #[error("A sweep pass is already running")]
    SweepInProgress,

    /// Committing reserved stock failed; the order stays Processing.
    #[error("Completing order {order_id} failed: {source}")]
    CommitFailed {
        order_id: OrderId,
        #[source]
        source: Box<EngineError>,
    },

    /// The transfer record was created but the move did not happen.
    #[error("Transfer {transfer_id} failed: {source}")]
    TransferFailed {
        transfer_id: TransferId,
        #[source]
        source: Box<EngineError>,
    },

    /// An error from the inventory store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            EngineError::InsufficientReserved { .. } => ErrorKind::Internal,
            EngineError::AlreadySettled { .. } => ErrorKind::InvalidState,
            EngineError::NoReservation { .. } => ErrorKind::InvalidState,
            EngineError::InactiveWarehouse(_) => ErrorKind::InactiveWarehouse,
            EngineError::InvalidTransfer(_) => ErrorKind::InvalidTransfer,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::OutcomeUnknown(_) => ErrorKind::OutcomeUnknown,
            EngineError::SweepInProgress => ErrorKind::InvalidState,
            EngineError::CommitFailed { .. } => ErrorKind::Internal,
            EngineError::TransferFailed { source, .. } => source.kind(),
            EngineError::Store(e) if e.is_conflict() => ErrorKind::ConcurrencyConflict,
            EngineError::Store(e) if e.is_transient() => ErrorKind::StoreUnavailable,
            EngineError::Store(_) => ErrorKind::Internal,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller's request was at fault.
    pub fn is_client_error(&self) -> bool {
        self.kind().is_client_error()
    }

    /// Returns true if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConcurrencyConflict | ErrorKind::StoreUnavailable
        )
    }

    /// Returns true for a single lost race that the engine retries itself.
    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_conflict())
    }

    pub(crate) fn stock_not_found(unit: &StockUnit) -> Self {
        EngineError::NotFound {
            what: "stock",
            id: unit.key(),
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Store(e) => EngineError::Store(e),
            DomainError::Order(e) => e.into(),
            DomainError::Warehouse(e) => e.into(),
            DomainError::Transfer(e) => e.into(),
            DomainError::NotFound { collection, id } => EngineError::NotFound {
                what: collection.as_str(),
                id: id.to_string(),
            },
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<OrderError> for EngineError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidStateTransition { .. } => EngineError::InvalidState(err.to_string()),
            other => EngineError::InvalidInput(other.to_string()),
        }
    }
}

impl From<WarehouseError> for EngineError {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::Inactive { warehouse_id } => EngineError::InactiveWarehouse(warehouse_id),
            other => EngineError::InvalidInput(other.to_string()),
        }
    }
}

impl From<TransferError> for EngineError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::AlreadyResolved { .. } => EngineError::InvalidState(err.to_string()),
            other => EngineError::InvalidTransfer(other.to_string()),
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
