//! Domain layer for the inventory engine.
//!
//! This crate provides:
//! - Order record with its lifecycle and validation
//! - Warehouse and StockTransfer records
//! - Record trait and Repository for version-checked document storage

pub mod error;
pub mod order;
pub mod record;
pub mod repository;
pub mod transfer;
pub mod warehouse;

pub use error::{DomainError, Result};
pub use order::{LineChanges, Money, Order, OrderError, OrderLine, OrderStatus};
pub use record::{Record, Versioned};
pub use repository::Repository;
pub use transfer::{StockTransfer, TransferError, TransferStatus};
pub use warehouse::{Warehouse, WarehouseError, WarehouseStatus};
