//! Persistence contract for the inventory engine.
//!
//! The store keeps three kinds of records:
//! - stock records: the `available`/`reserved` counters of a stock unit
//! - ledger entries: one journal row per applied stock movement
//! - documents: versioned JSON bodies for orders, warehouses and transfers
//!
//! Every write carries an expected version and a [`UnitOfWork`] is applied
//! atomically: all of its writes become visible, or none do.

pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use document::{Collection, Document};
pub use error::{RecordRef, Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::DocumentQuery;
pub use record::{
    LedgerEntry, MovementKind, OperationId, Reference, StockLevel, StockRecord, StockUnit, Version,
};
pub use store::{InventoryStore, InventoryStoreExt, UnitOfWork, Write};
