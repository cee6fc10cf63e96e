//! Value objects for the order domain.

use common::{ProductId, WarehouseId};
use serde::{Deserialize, Serialize};
use stock_store::StockUnit;

/// A price in minor currency units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Self)
    }

    /// The price of `quantity` units at this price.
    pub fn checked_multiply(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Self)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// One line of an order.
///
/// A line without a warehouse reserves from the product's catalog-wide
/// stock; a line with one reserves from that warehouse's stock of the
/// product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,

    /// The warehouse to reserve from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<WarehouseId>,

    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    /// Creates a line reserving catalog-wide stock.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            warehouse_id: None,
            quantity,
            unit_price,
        }
    }

    /// Reserves this line from a specific warehouse.
    pub fn from_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }

    /// The stock unit this line reserves from.
    pub fn stock_unit(&self) -> StockUnit {
        match self.warehouse_id {
            Some(warehouse) => StockUnit::in_warehouse(warehouse, self.product_id.clone()),
            None => StockUnit::Product(self.product_id.clone()),
        }
    }

    /// Returns the total price for this line, or `None` on overflow.
    pub fn total_price(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}
