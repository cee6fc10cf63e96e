//! Inventory reservation and transfer engine.
//!
//! Stock lives in per-unit counters (`available`, `reserved`) that only the
//! [`StockLedger`] writes. On top of it:
//! - [`ReservationCoordinator`] reserves stock for orders and commits or
//!   releases it as orders complete or are cancelled
//! - [`TransferCoordinator`] moves stock between warehouses atomically
//! - [`WarehouseService`] manages warehouses and stock adjustments
//! - [`ExpirySweeper`] cancels stale orders, fails stale transfers and
//!   reclaims orphaned reservations
//!
//! Correctness rests on the store's version-checked writes and atomic units
//! of work; no in-process lock guards a read-check-write.

pub mod config;
pub mod deadline;
pub mod error;
pub mod ledger;
pub mod reservation;
pub mod retry;
pub mod sweeper;
pub mod transfer;
pub mod warehouse;

use std::sync::Arc;

use common::OrderId;
use domain::{Order, OrderLine, StockTransfer};
use stock_store::InventoryStore;

pub use config::{EngineConfig, SweeperConfig};
pub use deadline::with_deadline;
pub use error::{EngineError, ErrorKind, Result};
pub use ledger::{Movement, StockLedger};
pub use reservation::{CreateOrderRequest, ReservationCoordinator};
pub use retry::RetryPolicy;
pub use sweeper::{ExpirySweeper, SweepReport};
pub use transfer::{TransferCoordinator, TransferRequest};
pub use warehouse::WarehouseService;

/// The engine's components wired to one store.
pub struct InventoryEngine<S: InventoryStore> {
    store: Arc<S>,
    config: EngineConfig,
    ledger: StockLedger<S>,
    reservations: ReservationCoordinator<S>,
    transfers: TransferCoordinator<S>,
    warehouses: WarehouseService<S>,
}

impl<S: InventoryStore> Clone for InventoryEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            ledger: self.ledger.clone(),
            reservations: self.reservations.clone(),
            transfers: self.transfers.clone(),
            warehouses: self.warehouses.clone(),
        }
    }
}

impl<S: InventoryStore> InventoryEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        let retry = RetryPolicy::new(config.max_conflict_retries);
        Self {
            ledger: StockLedger::new(Arc::clone(&store), retry),
            reservations: ReservationCoordinator::new(Arc::clone(&store), retry),
            transfers: TransferCoordinator::new(Arc::clone(&store), retry),
            warehouses: WarehouseService::new(Arc::clone(&store), retry),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &StockLedger<S> {
        &self.ledger
    }

    pub fn reservations(&self) -> &ReservationCoordinator<S> {
        &self.reservations
    }

    pub fn transfers(&self) -> &TransferCoordinator<S> {
        &self.transfers
    }

    pub fn warehouses(&self) -> &WarehouseService<S> {
        &self.warehouses
    }

    /// A sweeper sharing this engine's store and configuration.
    pub fn sweeper(&self) -> ExpirySweeper<S> {
        ExpirySweeper::new(
            Arc::clone(&self.store),
            self.reservations.clone(),
            self.transfers.clone(),
            self.config.sweeper.clone(),
        )
    }

    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        self.reservations.create_order(request).await
    }

    pub async fn update_order(&self, id: OrderId, lines: Vec<OrderLine>) -> Result<Order> {
        self.reservations.update_order(id, lines).await
    }

    pub async fn process_order(&self, id: OrderId) -> Result<Order> {
        self.reservations.process_order(id).await
    }

    pub async fn complete_order(&self, id: OrderId) -> Result<Order> {
        self.reservations.complete_order(id).await
    }

    pub async fn cancel_order(&self, id: OrderId) -> Result<Order> {
        self.reservations.cancel_order(id).await
    }

    pub async fn transfer(&self, request: TransferRequest) -> Result<StockTransfer> {
        self.transfers.transfer(request).await
    }
}
