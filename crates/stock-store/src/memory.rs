use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::WarehouseId;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Collection, Document, DocumentQuery, LedgerEntry, MovementKind, OperationId, RecordRef,
    Reference, Result, StockRecord, StockUnit, StoreError, Version,
    store::{InventoryStore, UnitOfWork, Write, validate_unit_of_work},
};

#[derive(Default)]
struct State {
    stock: HashMap<StockUnit, StockRecord>,
    entries: Vec<LedgerEntry>,
    entry_index: HashMap<OperationId, usize>,
    documents: HashMap<(Collection, Uuid), Document>,
    commit_fault: Option<usize>,
}

enum Staged {
    Stock(StockRecord),
    Entry(LedgerEntry),
    Document(Document),
}

/// In-memory inventory store implementation for testing and local runs.
///
/// A commit validates and stages every write under one write lock and only
/// then applies them, so a failed commit leaves nothing behind. A fault can
/// be injected into the next commit to simulate a crash between two writes.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit that stages more than `after_writes` writes
    /// fail with `Unavailable` at that point. Smaller commits go through and
    /// leave the fault armed.
    pub async fn inject_commit_fault(&self, after_writes: usize) {
        self.state.write().await.commit_fault = Some(after_writes);
    }

    /// Returns the total number of journal entries stored.
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

impl State {
    fn is_settled(&self, reference: &Reference) -> bool {
        [MovementKind::Release, MovementKind::Commit]
            .iter()
            .any(|kind| {
                self.entry_index
                    .contains_key(&OperationId::new(*kind, reference))
            })
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn load_stock(&self, units: &[StockUnit]) -> Result<Vec<StockRecord>> {
        let state = self.state.read().await;
        Ok(units
            .iter()
            .filter_map(|unit| state.stock.get(unit).cloned())
            .collect())
    }

    async fn stock_for_warehouse(&self, warehouse: WarehouseId) -> Result<Vec<StockRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .stock
            .values()
            .filter(|r| r.unit.warehouse_id() == Some(warehouse))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.unit.cmp(&b.unit));
        Ok(records)
    }

    async fn find_entries(&self, ids: &[OperationId]) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.entry_index.get(id))
            .map(|&index| state.entries[index].clone())
            .collect())
    }

    async fn unsettled_reservations(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| {
                e.kind == MovementKind::Reserve
                    && e.recorded_at < before
                    && matches!(e.reference, Reference::OrderLine { .. })
                    && !state.is_settled(&e.reference)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_document(&self, collection: Collection, id: Uuid) -> Result<Option<Document>> {
        let state = self.state.read().await;
        Ok(state.documents.get(&(collection, id)).cloned())
    }

    async fn find_documents(&self, query: DocumentQuery) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        let mut documents: Vec<_> = state
            .documents
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();

        // Least recently updated first
        documents.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));

        if let Some(limit) = query.limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        validate_unit_of_work(&unit)?;

        let mut state = self.state.write().await;
        let fault = state.commit_fault;
        let now = Utc::now();

        let mut staged = Vec::with_capacity(unit.len());
        for (index, write) in unit.into_writes().into_iter().enumerate() {
            if fault == Some(index) {
                state.commit_fault = None;
                tracing::debug!(index, "injected commit fault");
                return Err(StoreError::Unavailable(format!(
                    "injected fault after {index} staged writes"
                )));
            }

            match write {
                Write::PutStock {
                    unit,
                    level,
                    expected,
                } => {
                    let actual = state
                        .stock
                        .get(&unit)
                        .map(|r| r.version)
                        .unwrap_or(Version::initial());
                    if actual != expected {
                        return Err(StoreError::ConcurrencyConflict {
                            record: RecordRef::Stock(unit),
                            expected,
                            actual,
                        });
                    }
                    staged.push(Staged::Stock(StockRecord {
                        unit,
                        level,
                        version: expected.next(),
                        updated_at: now,
                    }));
                }
                Write::AppendEntry(entry) => {
                    if state.entry_index.contains_key(&entry.operation_id) {
                        return Err(StoreError::DuplicateEntry(entry.operation_id));
                    }
                    staged.push(Staged::Entry(entry));
                }
                Write::PutDocument(mut document) => {
                    let key = (document.collection, document.id);
                    let expected = document.version;
                    let actual = state
                        .documents
                        .get(&key)
                        .map(|d| d.version)
                        .unwrap_or(Version::initial());
                    if actual != expected {
                        return Err(StoreError::ConcurrencyConflict {
                            record: RecordRef::Document(document.collection, document.id),
                            expected,
                            actual,
                        });
                    }
                    document.version = expected.next();
                    staged.push(Staged::Document(document));
                }
                Write::CheckDocument {
                    collection,
                    id,
                    expected,
                } => {
                    let actual = state
                        .documents
                        .get(&(collection, id))
                        .map(|d| d.version)
                        .unwrap_or(Version::initial());
                    if actual != expected {
                        return Err(StoreError::ConcurrencyConflict {
                            record: RecordRef::Document(collection, id),
                            expected,
                            actual,
                        });
                    }
                }
            }
        }

        for change in staged {
            match change {
                Staged::Stock(record) => {
                    state.stock.insert(record.unit.clone(), record);
                }
                Staged::Entry(entry) => {
                    let index = state.entries.len();
                    state.entry_index.insert(entry.operation_id.clone(), index);
                    state.entries.push(entry);
                }
                Staged::Document(document) => {
                    state
                        .documents
                        .insert((document.collection, document.id), document);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InventoryStoreExt, StockLevel};
    use common::OrderId;

    fn reserve_entry(order: OrderId, line: u32, quantity: u64) -> LedgerEntry {
        LedgerEntry::new(
            MovementKind::Reserve,
            Reference::OrderLine { order, line },
            StockUnit::product("SKU-1"),
            quantity,
        )
    }

    async fn seed(store: &InMemoryStore, unit: &StockUnit, available: u64) {
        store
            .commit_write(Write::PutStock {
                unit: unit.clone(),
                level: StockLevel::new(available, 0),
                expected: Version::initial(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_stock_creates_and_versions_record() {
        let store = InMemoryStore::new();
        let unit = StockUnit::product("SKU-1");
        seed(&store, &unit, 10).await;

        let record = store.get_stock(&unit).await.unwrap().unwrap();
        assert_eq!(record.level, StockLevel::new(10, 0));
        assert_eq!(record.version, Version::first());
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemoryStore::new();
        let unit = StockUnit::product("SKU-1");
        seed(&store, &unit, 10).await;

        let result = store
            .commit_write(Write::PutStock {
                unit: unit.clone(),
                level: StockLevel::new(5, 5),
                expected: Version::initial(),
            })
            .await;

        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { .. })
        ));
        let record = store.get_stock(&unit).await.unwrap().unwrap();
        assert_eq!(record.level, StockLevel::new(10, 0));
    }

    #[tokio::test]
    async fn conflict_rolls_back_whole_unit() {
        let store = InMemoryStore::new();
        let a = StockUnit::product("SKU-A");
        let b = StockUnit::product("SKU-B");
        seed(&store, &a, 10).await;
        seed(&store, &b, 10).await;

        let mut unit = UnitOfWork::new();
        unit.put_stock(a.clone(), StockLevel::new(0, 0), Version::first());
        unit.put_stock(b.clone(), StockLevel::new(20, 0), Version::new(7));
        unit.append_entry(reserve_entry(OrderId::new(), 0, 1));

        assert!(store.commit(unit).await.is_err());
        assert_eq!(
            store.get_stock(&a).await.unwrap().unwrap().level.available,
            10
        );
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_entry_is_rejected() {
        let store = InMemoryStore::new();
        let entry = reserve_entry(OrderId::new(), 0, 2);

        store
            .commit_write(Write::AppendEntry(entry.clone()))
            .await
            .unwrap();
        let result = store.commit_write(Write::AppendEntry(entry.clone())).await;

        assert!(matches!(result, Err(StoreError::DuplicateEntry(_))));
        assert!(store.entry_exists(&entry.operation_id).await.unwrap());
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn injected_fault_leaves_nothing_visible() {
        let store = InMemoryStore::new();
        let source = StockUnit::in_warehouse(WarehouseId::new(), "SKU-1");
        let dest = StockUnit::in_warehouse(WarehouseId::new(), "SKU-1");
        seed(&store, &source, 100).await;

        store.inject_commit_fault(1).await;

        let mut unit = UnitOfWork::new();
        unit.put_stock(source.clone(), StockLevel::new(50, 0), Version::first());
        unit.put_stock(dest.clone(), StockLevel::new(50, 0), Version::initial());
        let result = store.commit(unit).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(
            store.get_stock(&source).await.unwrap().unwrap().level,
            StockLevel::new(100, 0)
        );
        assert!(store.get_stock(&dest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fault_is_one_shot() {
        let store = InMemoryStore::new();
        let unit = StockUnit::product("SKU-1");
        store.inject_commit_fault(0).await;

        let write = Write::PutStock {
            unit: unit.clone(),
            level: StockLevel::new(1, 0),
            expected: Version::initial(),
        };
        assert!(store.commit_write(write.clone()).await.is_err());
        assert!(store.commit_write(write).await.is_ok());
    }

    #[tokio::test]
    async fn documents_are_version_checked() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let doc = Document::from_record(
            Collection::Transfers,
            id,
            "Pending",
            Utc::now(),
            &serde_json::json!({"quantity": 5}),
        )
        .unwrap();

        store
            .commit_write(Write::PutDocument(doc.clone()))
            .await
            .unwrap();
        let stored = store
            .get_document(Collection::Transfers, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, Version::first());

        // Writing again from the stale (unversioned) copy loses the race
        let result = store.commit_write(Write::PutDocument(doc)).await;
        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict {
                record: RecordRef::Document(Collection::Transfers, _),
                ..
            })
        ));

        let mut completed = stored.clone();
        completed.status = "Completed".into();
        store
            .commit_write(Write::PutDocument(completed))
            .await
            .unwrap();
        let stored = store
            .get_document(Collection::Transfers, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, "Completed");
        assert_eq!(stored.version, Version::new(2));
    }

    #[tokio::test]
    async fn stale_document_check_fails_the_whole_unit() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let doc = Document::from_record(
            Collection::Warehouses,
            id,
            "Active",
            Utc::now(),
            &serde_json::json!({"name": "north"}),
        )
        .unwrap();
        store.commit_write(Write::PutDocument(doc)).await.unwrap();

        let unit_for = |expected| {
            let mut unit = UnitOfWork::new();
            unit.put_stock(StockUnit::product("SKU-1"), StockLevel::new(5, 0), Version::initial());
            unit.check_document(Collection::Warehouses, id, expected);
            unit
        };

        let result = store.commit(unit_for(Version::initial())).await;
        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict {
                record: RecordRef::Document(Collection::Warehouses, _),
                actual,
                ..
            }) if actual == Version::first()
        ));
        assert!(store.load_stock(&[StockUnit::product("SKU-1")]).await.unwrap().is_empty());

        store.commit(unit_for(Version::first())).await.unwrap();
        let stored = store
            .get_document(Collection::Warehouses, id)
            .await
            .unwrap()
            .unwrap();
        // A check never bumps the version
        assert_eq!(stored.version, Version::first());
    }

    #[tokio::test]
    async fn unsettled_reservations_skip_released_and_committed_lines() {
        let store = InMemoryStore::new();
        let order = OrderId::new();
        let mut unit = UnitOfWork::new();
        for line in 0..3 {
            unit.append_entry(reserve_entry(order, line, 1));
        }
        unit.append_entry(LedgerEntry::new(
            MovementKind::Release,
            Reference::OrderLine { order, line: 0 },
            StockUnit::product("SKU-1"),
            1,
        ));
        unit.append_entry(LedgerEntry::new(
            MovementKind::Commit,
            Reference::OrderLine { order, line: 1 },
            StockUnit::product("SKU-1"),
            1,
        ));
        store.commit(unit).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        let unsettled = store.unsettled_reservations(later, 10).await.unwrap();
        assert_eq!(unsettled.len(), 1);
        assert_eq!(
            unsettled[0].reference,
            Reference::OrderLine { order, line: 2 }
        );

        let earlier = Utc::now() - chrono::Duration::minutes(1);
        assert!(
            store
                .unsettled_reservations(earlier, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn stock_for_warehouse_filters_by_warehouse() {
        let store = InMemoryStore::new();
        let w1 = WarehouseId::new();
        let w2 = WarehouseId::new();
        seed(&store, &StockUnit::in_warehouse(w1, "SKU-1"), 1).await;
        seed(&store, &StockUnit::in_warehouse(w1, "SKU-2"), 2).await;
        seed(&store, &StockUnit::in_warehouse(w2, "SKU-1"), 3).await;
        seed(&store, &StockUnit::product("SKU-1"), 4).await;

        let records = store.stock_for_warehouse(w1).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.unit.warehouse_id() == Some(w1)));
    }
}
