//! Identifier types shared by every crate of the inventory engine.

pub mod types;

pub use types::{CustomerId, OrderId, ProductId, ShopId, TransferId, WarehouseId};
