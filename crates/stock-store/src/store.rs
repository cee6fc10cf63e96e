use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::WarehouseId;
use uuid::Uuid;

use crate::{
    Collection, Document, DocumentQuery, LedgerEntry, OperationId, Reference, Result, StockLevel,
    StockRecord, StockUnit, StoreError, Version,
};

/// A single write inside a [`UnitOfWork`].
#[derive(Debug, Clone)]
pub enum Write {
    /// Sets the counters of a stock record.
    ///
    /// `expected` is the version the writer read; `Version::initial()` means
    /// the record must not exist yet.
    PutStock {
        unit: StockUnit,
        level: StockLevel,
        expected: Version,
    },

    /// Records a journal entry. Fails with `DuplicateEntry` if the operation
    /// id has been recorded before.
    AppendEntry(LedgerEntry),

    /// Stores a document. The document's own `version` is the expected
    /// version of the stored copy.
    PutDocument(Document),

    /// Writes nothing but fails the unit with `ConcurrencyConflict` unless
    /// the document is still at `expected`. Lets a unit depend on a document
    /// it read without rewriting it.
    CheckDocument {
        collection: Collection,
        id: Uuid,
        expected: Version,
    },
}

/// A set of writes the store applies atomically.
///
/// Either every write is applied and becomes visible at once, or the commit
/// fails and none of them is visible.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    writes: Vec<Write>,
}

impl UnitOfWork {
    /// Creates an empty unit of work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stock counter write.
    pub fn put_stock(&mut self, unit: StockUnit, level: StockLevel, expected: Version) {
        self.writes.push(Write::PutStock {
            unit,
            level,
            expected,
        });
    }

    /// Adds a journal entry.
    pub fn append_entry(&mut self, entry: LedgerEntry) {
        self.writes.push(Write::AppendEntry(entry));
    }

    /// Adds a document write.
    pub fn put_document(&mut self, document: Document) {
        self.writes.push(Write::PutDocument(document));
    }

    /// Adds a version check on a document.
    pub fn check_document(&mut self, collection: Collection, id: Uuid, expected: Version) {
        self.writes.push(Write::CheckDocument {
            collection,
            id,
            expected,
        });
    }

    /// Adds an already-built write.
    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    /// Returns the writes in the order they were added.
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    /// Consumes the unit, returning its writes.
    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    /// Returns the number of writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if the unit has no writes.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Core trait for inventory store implementations.
///
/// A store must provide per-record version-checked writes and multi-record
/// atomic commits. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Loads the stock records of the given units. Missing units are absent
    /// from the result.
    async fn load_stock(&self, units: &[StockUnit]) -> Result<Vec<StockRecord>>;

    /// Loads every stock record held by a warehouse.
    async fn stock_for_warehouse(&self, warehouse: WarehouseId) -> Result<Vec<StockRecord>>;

    /// Loads the journal entries with the given operation ids.
    async fn find_entries(&self, ids: &[OperationId]) -> Result<Vec<LedgerEntry>>;

    /// Returns order-line reservations recorded before `before` that have
    /// neither a release nor a commit entry, oldest first.
    async fn unsettled_reservations(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Loads a document by collection and id.
    async fn get_document(&self, collection: Collection, id: Uuid) -> Result<Option<Document>>;

    /// Finds documents matching a query, least recently updated first.
    async fn find_documents(&self, query: DocumentQuery) -> Result<Vec<Document>>;

    /// Applies a unit of work atomically.
    ///
    /// Fails with `ConcurrencyConflict` if any expected version does not
    /// match, or with `DuplicateEntry` if a journal entry already exists. On
    /// any error nothing from the unit is visible.
    async fn commit(&self, unit: UnitOfWork) -> Result<()>;
}

/// Extension trait providing convenience methods for inventory stores.
#[async_trait]
pub trait InventoryStoreExt: InventoryStore {
    /// Loads a single stock record.
    async fn get_stock(&self, unit: &StockUnit) -> Result<Option<StockRecord>> {
        let mut records = self.load_stock(std::slice::from_ref(unit)).await?;
        Ok(records.pop())
    }

    /// Checks if an operation has been journaled.
    async fn entry_exists(&self, id: &OperationId) -> Result<bool> {
        Ok(!self.find_entries(std::slice::from_ref(id)).await?.is_empty())
    }

    /// Commits a unit holding a single write.
    async fn commit_write(&self, write: Write) -> Result<()> {
        let mut unit = UnitOfWork::new();
        unit.push(write);
        self.commit(unit).await
    }
}

// Blanket implementation for all InventoryStore implementations
impl<T: InventoryStore + ?Sized> InventoryStoreExt for T {}

/// Validates a unit of work before it is applied.
///
/// A unit may not be empty, may not write or check the same record twice and
/// may not journal the same operation twice.
pub fn validate_unit_of_work(unit: &UnitOfWork) -> Result<()> {
    if unit.is_empty() {
        return Err(StoreError::InvalidUnitOfWork(
            "Cannot commit an empty unit of work".to_string(),
        ));
    }

    let mut units = HashSet::new();
    let mut documents = HashSet::new();
    let mut operations = HashSet::new();

    for write in unit.writes() {
        match write {
            Write::PutStock { unit, .. } => {
                if !units.insert(unit) {
                    return Err(StoreError::InvalidUnitOfWork(format!(
                        "Stock record {unit} written twice"
                    )));
                }
            }
            Write::AppendEntry(entry) => {
                if entry.quantity == 0 {
                    return Err(StoreError::InvalidUnitOfWork(format!(
                        "Ledger entry {} has zero quantity",
                        entry.operation_id
                    )));
                }
                if !operations.insert(&entry.operation_id) {
                    return Err(StoreError::InvalidUnitOfWork(format!(
                        "Operation {} journaled twice",
                        entry.operation_id
                    )));
                }
            }
            Write::PutDocument(Document { collection, id, .. })
            | Write::CheckDocument { collection, id, .. } => {
                if !documents.insert((*collection, *id)) {
                    return Err(StoreError::InvalidUnitOfWork(format!(
                        "Document {collection} {id} used twice"
                    )));
                }
            }
        }
    }

    Ok(())
}
