use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, TransferId, WarehouseId};
use serde::{Deserialize, Serialize};

/// Version number for a stored record, used for optimistic concurrency control.
///
/// Version 0 means "does not exist yet"; the first write creates version 1 and
/// each subsequent write increments by 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a record that was never written.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) of a freshly created record.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A stock-holding key: a product, or a product within a specific warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockUnit {
    /// Stock tracked for a product across the whole catalog.
    Product(ProductId),
    /// Stock of a product held by one warehouse.
    WarehouseProduct {
        warehouse: WarehouseId,
        product: ProductId,
    },
}

impl StockUnit {
    /// Stock unit for a product.
    pub fn product(product: impl Into<ProductId>) -> Self {
        StockUnit::Product(product.into())
    }

    /// Stock unit for a product in a warehouse.
    pub fn in_warehouse(warehouse: WarehouseId, product: impl Into<ProductId>) -> Self {
        StockUnit::WarehouseProduct {
            warehouse,
            product: product.into(),
        }
    }

    /// The product this unit tracks.
    pub fn product_id(&self) -> &ProductId {
        match self {
            StockUnit::Product(product) => product,
            StockUnit::WarehouseProduct { product, .. } => product,
        }
    }

    /// The warehouse holding this unit, if any.
    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        match self {
            StockUnit::Product(_) => None,
            StockUnit::WarehouseProduct { warehouse, .. } => Some(*warehouse),
        }
    }

    /// Stable storage key, e.g. `product:SKU-1` or `warehouse:<uuid>:SKU-1`.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for StockUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockUnit::Product(product) => write!(f, "product:{product}"),
            StockUnit::WarehouseProduct { warehouse, product } => {
                write!(f, "warehouse:{warehouse}:{product}")
            }
        }
    }
}

impl FromStr for StockUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(product) = s.strip_prefix("product:") {
            return Ok(StockUnit::Product(ProductId::new(product)));
        }
        if let Some(rest) = s.strip_prefix("warehouse:")
            && let Some((warehouse, product)) = rest.split_once(':')
        {
            let warehouse = warehouse
                .parse::<WarehouseId>()
                .map_err(|e| format!("invalid warehouse in stock key {s:?}: {e}"))?;
            return Ok(StockUnit::in_warehouse(warehouse, product));
        }
        Err(format!("invalid stock key: {s:?}"))
    }
}

/// The counters of a stock unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockLevel {
    /// Quantity that can still be reserved, debited or sold.
    pub available: u64,
    /// Quantity held by live reservations.
    pub reserved: u64,
}

impl StockLevel {
    /// Creates a level from its two counters.
    pub fn new(available: u64, reserved: u64) -> Self {
        Self {
            available,
            reserved,
        }
    }

    /// Total physical stock: available plus reserved.
    pub fn total(&self) -> u64 {
        self.available + self.reserved
    }
}

/// A stock record as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub unit: StockUnit,
    pub level: StockLevel,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

/// The kind of a stock movement applied by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// available → reserved
    Reserve,
    /// reserved → available
    Release,
    /// reserved → consumed
    Commit,
    /// available → out of this unit
    Debit,
    /// into this unit → available
    Credit,
}

impl MovementKind {
    /// Returns the kind name as stored in the journal.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Reserve => "reserve",
            MovementKind::Release => "release",
            MovementKind::Commit => "commit",
            MovementKind::Debit => "debit",
            MovementKind::Credit => "credit",
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserve" => Ok(MovementKind::Reserve),
            "release" => Ok(MovementKind::Release),
            "commit" => Ok(MovementKind::Commit),
            "debit" => Ok(MovementKind::Debit),
            "credit" => Ok(MovementKind::Credit),
            other => Err(format!("unknown movement kind: {other:?}")),
        }
    }
}

/// What a stock movement was made for.
///
/// Together with the [`MovementKind`] it forms the movement's [`OperationId`],
/// which makes every ledger primitive safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// One line of an order.
    OrderLine { order: OrderId, line: u32 },
    /// A warehouse-to-warehouse transfer.
    Transfer(TransferId),
    /// A caller-supplied key, e.g. a stock adjustment or a direct reservation.
    External(String),
}

impl Reference {
    /// The order this reference belongs to, if any.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Reference::OrderLine { order, .. } => Some(*order),
            _ => None,
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::OrderLine { order, line } => write!(f, "order:{order}:{line}"),
            Reference::Transfer(id) => write!(f, "transfer:{id}"),
            Reference::External(key) => write!(f, "external:{key}"),
        }
    }
}

impl FromStr for Reference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid reference: {s:?}"))?;
        match scope {
            "order" => {
                let (order, line) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("invalid order reference: {s:?}"))?;
                Ok(Reference::OrderLine {
                    order: order.parse().map_err(|e| format!("{s:?}: {e}"))?,
                    line: line.parse().map_err(|e| format!("{s:?}: {e}"))?,
                })
            }
            "transfer" => Ok(Reference::Transfer(
                rest.parse().map_err(|e| format!("{s:?}: {e}"))?,
            )),
            "external" => Ok(Reference::External(rest.to_string())),
            other => Err(format!("unknown reference scope: {other:?}")),
        }
    }
}

/// Unique identifier of one ledger movement: `<kind>:<reference>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Builds the operation id of a movement.
    pub fn new(kind: MovementKind, reference: &Reference) -> Self {
        Self(format!("{kind}:{reference}"))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Journal row written in the same unit of work as the counter change it
/// describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub operation_id: OperationId,
    pub kind: MovementKind,
    pub reference: Reference,
    pub unit: StockUnit,
    pub quantity: u64,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Creates a journal entry stamped with the current time.
    pub fn new(kind: MovementKind, reference: Reference, unit: StockUnit, quantity: u64) -> Self {
        Self {
            operation_id: OperationId::new(kind, &reference),
            kind,
            reference,
            unit,
            quantity,
            recorded_at: Utc::now(),
        }
    }
}
