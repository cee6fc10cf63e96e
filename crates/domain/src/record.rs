//! Versioned domain records.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use stock_store::{Collection, Document, Version};
use uuid::Uuid;

use crate::error::{DomainError, Result};

/// A domain record persisted as a versioned document.
///
/// The record's status and last update time are lifted into the document so
/// the store can answer "stale pending" queries.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// The collection holding records of this type.
    const COLLECTION: Collection;

    /// Returns the record's identifier.
    fn record_id(&self) -> Uuid;

    /// Returns the status name stored alongside the document.
    fn status_name(&self) -> &'static str;

    /// Returns when the record last changed.
    fn updated_at(&self) -> DateTime<Utc>;
}

/// A record together with the version it was loaded at.
///
/// Saving a `Versioned` record is a conditional write: it succeeds only if
/// the stored copy is still at `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: Version,
}

impl<T: Record> Versioned<T> {
    /// Wraps a record that has never been stored.
    pub fn new(record: T) -> Self {
        Self {
            record,
            version: Version::initial(),
        }
    }

    /// Decodes a stored document.
    pub fn from_document(document: &Document) -> Result<Self> {
        if document.collection != T::COLLECTION {
            return Err(DomainError::WrongCollection {
                expected: T::COLLECTION,
                actual: document.collection,
            });
        }
        Ok(Self {
            record: document.to_record()?,
            version: document.version,
        })
    }

    /// Encodes the record as a document whose version is the expected one.
    pub fn to_document(&self) -> Result<Document> {
        let mut document = Document::from_record(
            T::COLLECTION,
            self.record.record_id(),
            self.record.status_name(),
            self.record.updated_at(),
            &self.record,
        )?;
        document.version = self.version;
        Ok(document)
    }

    /// Returns the record, dropping its version.
    pub fn into_inner(self) -> T {
        self.record
    }
}

impl<T> std::ops::Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}
