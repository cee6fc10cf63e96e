//! Warehouse management and stock adjustments.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use common::{ProductId, WarehouseId};
use domain::{Repository, Warehouse, WarehouseStatus};
use stock_store::{InventoryStore, Reference, StockLevel, StockUnit, Write};

use crate::error::{EngineError, Result};
use crate::ledger::{Movement, StockLedger};
use crate::retry::RetryPolicy;

/// Creates warehouses, switches them on and off, and adjusts their stock.
pub struct WarehouseService<S: InventoryStore> {
    store: Arc<S>,
    ledger: StockLedger<S>,
    warehouses: Repository<S, Warehouse>,
    retry: RetryPolicy,
}

impl<S: InventoryStore> Clone for WarehouseService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: self.ledger.clone(),
            warehouses: self.warehouses.clone(),
            retry: self.retry,
        }
    }
}

impl<S: InventoryStore> WarehouseService<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self {
            ledger: StockLedger::new(Arc::clone(&store), retry),
            warehouses: Repository::new(Arc::clone(&store)),
            store,
            retry,
        }
    }

    /// Creates an Active warehouse.
    #[tracing::instrument(skip(self))]
    pub async fn create_warehouse(&self, name: &str, location: &str) -> Result<Warehouse> {
        let warehouse = Warehouse::new(WarehouseId::new(), name, location, Utc::now())?;
        let saved = self.warehouses.insert(warehouse).await?;
        tracing::info!(warehouse_id = %saved.id(), "warehouse created");
        Ok(saved.into_inner())
    }

    pub async fn get_warehouse(&self, id: WarehouseId) -> Result<Warehouse> {
        Ok(self.warehouses.load(id.as_uuid()).await?.into_inner())
    }

    /// Every warehouse, least recently updated first.
    pub async fn list_warehouses(&self) -> Result<Vec<Warehouse>> {
        Ok(self
            .warehouses
            .find_all(self.warehouses.query())
            .await?
            .into_iter()
            .map(|warehouse| warehouse.into_inner())
            .collect())
    }

    pub async fn activate_warehouse(&self, id: WarehouseId) -> Result<Warehouse> {
        self.set_status(id, WarehouseStatus::Active).await
    }

    /// Stops the warehouse from taking part in new reservations and
    /// transfers. Stock already reserved there stays reserved.
    pub async fn deactivate_warehouse(&self, id: WarehouseId) -> Result<Warehouse> {
        self.set_status(id, WarehouseStatus::Inactive).await
    }

    /// Stock levels held by a warehouse, by product.
    pub async fn warehouse_stock(&self, id: WarehouseId) -> Result<BTreeMap<ProductId, StockLevel>> {
        self.warehouses.load(id.as_uuid()).await?;
        Ok(self
            .store
            .stock_for_warehouse(id)
            .await?
            .into_iter()
            .map(|record| (record.unit.product_id().clone(), record.level))
            .collect())
    }

    /// Adds (`delta > 0`) or removes (`delta < 0`) available stock.
    ///
    /// `adjustment_key` identifies the adjustment: repeating a call with the
    /// same key changes nothing. Removing more than is available fails with
    /// `InsufficientStock`; reserved stock is never touched. Stock of a
    /// warehouse is only adjusted while it is Active, checked in the same
    /// unit of work as the adjustment.
    #[tracing::instrument(skip(self, unit), fields(unit = %unit))]
    pub async fn adjust_stock(
        &self,
        unit: StockUnit,
        delta: i64,
        adjustment_key: &str,
    ) -> Result<StockLevel> {
        if delta == 0 {
            return Err(EngineError::InvalidInput(
                "stock adjustment must not be zero".to_string(),
            ));
        }
        if adjustment_key.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "stock adjustment key is required".to_string(),
            ));
        }

        let reference = Reference::External(adjustment_key.to_string());
        let quantity = delta.unsigned_abs();
        let movement = if delta > 0 {
            Movement::credit(unit, quantity, reference)
        } else {
            Movement::debit(unit, quantity, reference)
        };

        let movement = &movement;
        let levels = self
            .retry
            .run("adjust_stock", |_| async move {
                let checks =
                    active_warehouse_checks(&self.warehouses, movement.unit.warehouse_id()).await?;
                self.ledger
                    .try_apply(std::slice::from_ref(movement), checks)
                    .await
            })
            .await?;
        let level = levels
            .first()
            .copied()
            .ok_or_else(|| EngineError::stock_not_found(&movement.unit))?;

        tracing::info!(delta, available = level.available, "stock adjusted");
        Ok(level)
    }

    async fn set_status(&self, id: WarehouseId, status: WarehouseStatus) -> Result<Warehouse> {
        let warehouses = &self.warehouses;
        let warehouse = self
            .retry
            .run("set_warehouse_status", |_| async move {
                let mut warehouse = warehouses.load(id.as_uuid()).await?;
                if !warehouse.record.set_status(status, Utc::now()) {
                    return Ok(warehouse);
                }
                Ok(warehouses.save(warehouse).await?)
            })
            .await?;

        tracing::info!(warehouse_id = %id, %status, "warehouse status set");
        Ok(warehouse.into_inner())
    }
}

/// Loads each warehouse, fails unless it is Active, and returns a check
/// pinning it at the version just read. Joining the checks to a unit of work
/// makes the unit fail if any of the warehouses changes before it commits.
pub(crate) async fn active_warehouse_checks<S: InventoryStore>(
    warehouses: &Repository<S, Warehouse>,
    ids: impl IntoIterator<Item = WarehouseId>,
) -> Result<Vec<Write>> {
    let ids: BTreeSet<WarehouseId> = ids.into_iter().collect();
    let mut checks = Vec::with_capacity(ids.len());
    for id in ids {
        let warehouse = warehouses.load(id.as_uuid()).await?;
        warehouse.ensure_active()?;
        checks.push(warehouses.check(&warehouse));
    }
    Ok(checks)
}
