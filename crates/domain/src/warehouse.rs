//! Warehouse record.

use chrono::{DateTime, Utc};
use common::WarehouseId;
use serde::{Deserialize, Serialize};
use stock_store::Collection;
use thiserror::Error;
use uuid::Uuid;

use crate::record::Record;

/// Whether a warehouse may take part in reservations and transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WarehouseStatus {
    #[default]
    Active,
    Inactive,
}

impl WarehouseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseStatus::Active => "Active",
            WarehouseStatus::Inactive => "Inactive",
        }
    }
}

impl std::fmt::Display for WarehouseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Warehouse name is required")]
    NameRequired,

    #[error("Warehouse location is required")]
    LocationRequired,

    #[error("Warehouse {warehouse_id} is not active")]
    Inactive { warehouse_id: WarehouseId },
}

/// A stock-holding location.
///
/// The stock itself lives in the ledger under
/// `StockUnit::WarehouseProduct { warehouse, .. }` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    id: WarehouseId,
    name: String,
    location: String,
    status: WarehouseStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Warehouse {
    /// Creates an Active warehouse. Name and location are required.
    pub fn new(
        id: WarehouseId,
        name: impl Into<String>,
        location: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, WarehouseError> {
        let name = name.into().trim().to_string();
        let location = location.into().trim().to_string();
        if name.is_empty() {
            return Err(WarehouseError::NameRequired);
        }
        if location.is_empty() {
            return Err(WarehouseError::LocationRequired);
        }

        Ok(Self {
            id,
            name,
            location,
            status: WarehouseStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> WarehouseId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn status(&self) -> WarehouseStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        self.status == WarehouseStatus::Active
    }

    /// Fails with `Inactive` unless the warehouse is Active.
    pub fn ensure_active(&self) -> Result<(), WarehouseError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(WarehouseError::Inactive {
                warehouse_id: self.id,
            })
        }
    }

    /// Sets the status. Returns false if it was already set.
    pub fn set_status(&mut self, status: WarehouseStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.updated_at = now;
        true
    }
}

impl Record for Warehouse {
    const COLLECTION: Collection = Collection::Warehouses;

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
