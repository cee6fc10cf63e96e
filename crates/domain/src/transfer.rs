//! Stock transfer record.

use chrono::{DateTime, Utc};
use common::{ProductId, TransferId, WarehouseId};
use serde::{Deserialize, Serialize};
use stock_store::{Collection, Reference, StockUnit};
use thiserror::Error;
use uuid::Uuid;

use crate::record::Record;

/// Lifecycle of a transfer: created Pending, resolved exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransferStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "Pending",
            TransferStatus::Completed => "Completed",
            TransferStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when creating or resolving a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transfer quantity must be greater than 0")]
    InvalidQuantity,

    #[error("Source and destination warehouse are the same: {warehouse_id}")]
    SelfTransfer { warehouse_id: WarehouseId },

    #[error("Product ID is required")]
    ProductIdRequired,

    #[error("Transfer already resolved as {status}")]
    AlreadyResolved { status: TransferStatus },
}

/// A move of stock of one product between two warehouses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTransfer {
    id: TransferId,
    product_id: ProductId,
    from_warehouse: WarehouseId,
    to_warehouse: WarehouseId,
    quantity: u64,
    status: TransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StockTransfer {
    /// Creates a Pending transfer.
    pub fn new(
        id: TransferId,
        product_id: impl Into<ProductId>,
        from_warehouse: WarehouseId,
        to_warehouse: WarehouseId,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, TransferError> {
        let product_id = product_id.into();
        if quantity == 0 {
            return Err(TransferError::InvalidQuantity);
        }
        if product_id.is_blank() {
            return Err(TransferError::ProductIdRequired);
        }
        if from_warehouse == to_warehouse {
            return Err(TransferError::SelfTransfer {
                warehouse_id: from_warehouse,
            });
        }

        Ok(Self {
            id,
            product_id,
            from_warehouse,
            to_warehouse,
            quantity,
            status: TransferStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn from_warehouse(&self) -> WarehouseId {
        self.from_warehouse
    }

    pub fn to_warehouse(&self) -> WarehouseId {
        self.to_warehouse
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Why the transfer failed, if it did.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The ledger reference shared by the debit and the credit.
    pub fn reference(&self) -> Reference {
        Reference::Transfer(self.id)
    }

    pub fn source_unit(&self) -> StockUnit {
        StockUnit::in_warehouse(self.from_warehouse, self.product_id.clone())
    }

    pub fn destination_unit(&self) -> StockUnit {
        StockUnit::in_warehouse(self.to_warehouse, self.product_id.clone())
    }

    /// Pending → Completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransferError> {
        self.resolve(TransferStatus::Completed, None, now)
    }

    /// Pending → Failed, recording why.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransferError> {
        self.resolve(TransferStatus::Failed, Some(reason.into()), now)
    }

    fn resolve(
        &mut self,
        status: TransferStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        if self.status.is_terminal() {
            return Err(TransferError::AlreadyResolved {
                status: self.status,
            });
        }
        self.status = status;
        self.failure_reason = reason;
        self.updated_at = now;
        Ok(())
    }
}

impl Record for StockTransfer {
    const COLLECTION: Collection = Collection::Transfers;

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn status_name(&self) -> &'static str {
        self.status.as_str()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(quantity: u64) -> Result<StockTransfer, TransferError> {
        StockTransfer::new(
            TransferId::new(),
            "SKU-1",
            WarehouseId::new(),
            WarehouseId::new(),
            quantity,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_transfer_is_pending() {
        let transfer = pending(50).unwrap();
        assert_eq!(transfer.status(), TransferStatus::Pending);
        assert_eq!(
            transfer.source_unit(),
            StockUnit::in_warehouse(transfer.from_warehouse(), "SKU-1")
        );
        assert_eq!(transfer.reference(), Reference::Transfer(transfer.id()));
    }

    #[test]
    fn test_rejects_zero_quantity_and_self_transfer() {
        assert!(matches!(pending(0), Err(TransferError::InvalidQuantity)));

        let warehouse = WarehouseId::new();
        let result =
            StockTransfer::new(TransferId::new(), "SKU-1", warehouse, warehouse, 5, Utc::now());
        assert!(matches!(result, Err(TransferError::SelfTransfer { .. })));
    }

    #[test]
    fn test_resolves_exactly_once() {
        let mut transfer = pending(5).unwrap();
        transfer.fail("source went inactive", Utc::now()).unwrap();
        assert_eq!(transfer.status(), TransferStatus::Failed);
        assert_eq!(transfer.failure_reason(), Some("source went inactive"));

        assert!(matches!(
            transfer.complete(Utc::now()),
            Err(TransferError::AlreadyResolved {
                status: TransferStatus::Failed
            })
        ));
    }
}
