use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::Version;

/// The document collections the engine persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Orders,
    Warehouses,
    Transfers,
}

impl Collection {
    /// Returns the collection name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::Warehouses => "warehouses",
            Collection::Transfers => "transfers",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orders" => Ok(Collection::Orders),
            "warehouses" => Ok(Collection::Warehouses),
            "transfers" => Ok(Collection::Transfers),
            other => Err(format!("unknown collection: {other:?}")),
        }
    }
}

/// A versioned JSON document.
///
/// `status` and `updated_at` are lifted out of the body so the store can
/// answer "stale pending" queries without decoding every document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The collection this document belongs to.
    pub collection: Collection,

    /// The document identifier, unique within its collection.
    pub id: Uuid,

    /// Lifecycle status of the record (e.g. "Pending").
    pub status: String,

    /// Version of the stored document; `Version::initial()` before the first write.
    pub version: Version,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,

    /// The serialized record.
    pub body: serde_json::Value,
}

impl Document {
    /// Creates an unversioned document from a serializable record.
    pub fn from_record<T: Serialize>(
        collection: Collection,
        id: Uuid,
        status: impl Into<String>,
        updated_at: DateTime<Utc>,
        record: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            collection,
            id,
            status: status.into(),
            version: Version::initial(),
            updated_at,
            body: serde_json::to_value(record)?,
        })
    }

    /// Deserializes the body into a record.
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}
