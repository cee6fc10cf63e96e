//! Warehouse-to-warehouse stock transfers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{ProductId, TransferId, WarehouseId};
use domain::{
    DomainError, Record, Repository, StockTransfer, TransferStatus, Versioned, Warehouse,
};
use stock_store::InventoryStore;

use crate::error::{EngineError, Result};
use crate::ledger::{Movement, StockLedger};
use crate::retry::RetryPolicy;
use crate::warehouse::active_warehouse_checks;

/// Request to move stock of one product between two warehouses.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from: WarehouseId,
    pub to: WarehouseId,
    pub quantity: u64,
}

impl TransferRequest {
    pub fn new(
        product_id: impl Into<ProductId>,
        from: WarehouseId,
        to: WarehouseId,
        quantity: u64,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            from,
            to,
            quantity,
        }
    }
}

/// Moves stock between warehouses.
///
/// The debit of the source, the credit of the destination and the
/// Pending → Completed update of the transfer record are one unit of work,
/// together with a check that both warehouses are still at the Active
/// version read for the attempt. Either all of it is visible or none is.
pub struct TransferCoordinator<S: InventoryStore> {
    ledger: StockLedger<S>,
    transfers: Repository<S, StockTransfer>,
    warehouses: Repository<S, Warehouse>,
    retry: RetryPolicy,
}

impl<S: InventoryStore> Clone for TransferCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            transfers: self.transfers.clone(),
            warehouses: self.warehouses.clone(),
            retry: self.retry,
        }
    }
}

impl<S: InventoryStore> TransferCoordinator<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self {
            ledger: StockLedger::new(Arc::clone(&store), retry),
            transfers: Repository::new(Arc::clone(&store)),
            warehouses: Repository::new(store),
            retry,
        }
    }

    /// Moves `quantity` of a product from one Active warehouse to another.
    ///
    /// Requests rejected up front (bad input, inactive warehouse, not enough
    /// stock at the source) create no transfer record. Once the record
    /// exists, a failure marks it Failed and is returned as
    /// `TransferFailed` carrying its id.
    #[tracing::instrument(skip(self, request), fields(product_id = %request.product_id, from = %request.from, to = %request.to, quantity = request.quantity))]
    pub async fn transfer(&self, request: TransferRequest) -> Result<StockTransfer> {
        let transfer = StockTransfer::new(
            TransferId::new(),
            request.product_id,
            request.from,
            request.to,
            request.quantity,
            Utc::now(),
        )?;

        // Rejected before a record exists; execution checks again atomically
        for warehouse in [transfer.from_warehouse(), transfer.to_warehouse()] {
            self.warehouses
                .load(warehouse.as_uuid())
                .await?
                .ensure_active()?;
        }

        let source = transfer.source_unit();
        let available = self
            .ledger
            .find_level(&source)
            .await?
            .map_or(0, |level| level.available);
        if available < transfer.quantity() {
            return Err(EngineError::InsufficientStock {
                unit: source,
                requested: transfer.quantity(),
                available,
            });
        }

        let id = transfer.id();
        self.transfers.insert(transfer).await?;

        match self.execute(id).await {
            Ok(completed) => {
                metrics::counter!("transfers_completed_total").increment(1);
                tracing::info!(transfer_id = %id, "transfer completed");
                Ok(completed)
            }
            Err(cause) => self.mark_failed(id, cause).await,
        }
    }

    /// Loads a transfer.
    pub async fn get_transfer(&self, id: TransferId) -> Result<StockTransfer> {
        Ok(self.transfers.load(id.as_uuid()).await?.into_inner())
    }

    /// Pending transfers last touched before `deadline`, oldest first.
    pub(crate) async fn stale_transfers(
        &self,
        deadline: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferId>> {
        let query = self
            .transfers
            .query()
            .status(TransferStatus::Pending.as_str())
            .updated_before(deadline)
            .limit(limit);
        Ok(self
            .transfers
            .find_all(query)
            .await?
            .into_iter()
            .map(|transfer| transfer.id())
            .collect())
    }

    /// Marks a transfer Failed if it is still Pending and was last touched
    /// before `deadline`. Losing the race to a completing transfer is not
    /// an error. Returns whether this call failed it.
    pub(crate) async fn fail_stale(&self, id: TransferId, deadline: DateTime<Utc>) -> Result<bool> {
        let Some(mut transfer) = self.transfers.find(id.as_uuid()).await? else {
            return Ok(false);
        };
        if transfer.status() != TransferStatus::Pending || transfer.updated_at() >= deadline {
            return Ok(false);
        }

        transfer
            .record
            .fail("not completed before its deadline", Utc::now())?;
        match self.transfers.save(transfer).await {
            Ok(_) => {
                metrics::counter!("transfers_failed_total").increment(1);
                tracing::info!(transfer_id = %id, "stale transfer failed");
                Ok(true)
            }
            Err(DomainError::Store(e)) if e.is_conflict() => {
                tracing::debug!(transfer_id = %id, "transfer changed while expiring it");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn execute(&self, id: TransferId) -> Result<StockTransfer> {
        let transfers = &self.transfers;
        let warehouses = &self.warehouses;
        let ledger = &self.ledger;
        self.retry
            .run("transfer", |_| async move {
                let mut transfer = transfers.load(id.as_uuid()).await?;
                match transfer.status() {
                    TransferStatus::Completed => return Ok(transfer.into_inner()),
                    TransferStatus::Failed => {
                        return Err(EngineError::InvalidState(format!(
                            "transfer {id} was failed before it could complete"
                        )));
                    }
                    TransferStatus::Pending => {}
                }

                let mut writes = active_warehouse_checks(
                    warehouses,
                    [transfer.from_warehouse(), transfer.to_warehouse()],
                )
                .await?;

                transfer.record.complete(Utc::now())?;
                let movements = [
                    Movement::debit(
                        transfer.source_unit(),
                        transfer.quantity(),
                        transfer.reference(),
                    ),
                    Movement::credit(
                        transfer.destination_unit(),
                        transfer.quantity(),
                        transfer.reference(),
                    ),
                ];
                writes.push(transfers.stage(&transfer)?);
                ledger.try_apply(&movements, writes).await?;
                Ok(transfer.into_inner())
            })
            .await
    }

    /// Records the failure of a transfer that could not be executed.
    ///
    /// If the transfer turns out to have completed after all, it is
    /// returned as a success.
    async fn mark_failed(&self, id: TransferId, cause: EngineError) -> Result<StockTransfer> {
        let reason = cause.to_string();
        let transfers = &self.transfers;
        let reason = reason.as_str();
        let resolved = self
            .retry
            .run("fail_transfer", |_| async move {
                let mut transfer = transfers.load(id.as_uuid()).await?;
                if transfer.status().is_terminal() {
                    return Ok(transfer);
                }
                transfer.record.fail(reason, Utc::now())?;
                Ok(transfers.save(transfer).await?)
            })
            .await;

        match resolved.map(Versioned::into_inner) {
            Ok(transfer) if transfer.status() == TransferStatus::Completed => {
                metrics::counter!("transfers_completed_total").increment(1);
                tracing::info!(transfer_id = %id, error = %cause, "transfer completed despite error");
                Ok(transfer)
            }
            Ok(_) => {
                metrics::counter!("transfers_failed_total").increment(1);
                tracing::warn!(transfer_id = %id, error = %cause, "transfer failed");
                Err(EngineError::TransferFailed {
                    transfer_id: id,
                    source: Box::new(cause),
                })
            }
            Err(e) => {
                tracing::error!(
                    transfer_id = %id,
                    error = %cause,
                    record_error = %e,
                    "transfer failed and could not be marked Failed"
                );
                Err(EngineError::TransferFailed {
                    transfer_id: id,
                    source: Box::new(cause),
                })
            }
        }
    }
}
