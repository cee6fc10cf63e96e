//! Version-checked storage of domain records.

use std::marker::PhantomData;
use std::sync::Arc;

use stock_store::{DocumentQuery, InventoryStore, InventoryStoreExt, Write};
use uuid::Uuid;

use crate::error::{DomainError, Result};
use crate::record::{Record, Versioned};

/// Loads and saves records of one type.
///
/// Every save is a conditional write against the version the record was
/// loaded at:
/// 1. Load the record and remember its version
/// 2. Change it in memory
/// 3. Save with the remembered version as the expectation
///
/// A concurrent writer in between makes step 3 fail with a store conflict,
/// and the caller decides whether to reload and retry.
pub struct Repository<S, T>
where
    S: InventoryStore,
    T: Record,
{
    store: Arc<S>,
    _phantom: PhantomData<T>,
}

impl<S, T> Clone for Repository<S, T>
where
    S: InventoryStore,
    T: Record,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _phantom: PhantomData,
        }
    }
}

impl<S, T> Repository<S, T>
where
    S: InventoryStore,
    T: Record,
{
    /// Creates a repository over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// A query over this record type's collection.
    pub fn query(&self) -> DocumentQuery {
        DocumentQuery::new(T::COLLECTION)
    }

    /// Loads a record, returning None if it doesn't exist.
    pub async fn find(&self, id: Uuid) -> Result<Option<Versioned<T>>> {
        self.store
            .get_document(T::COLLECTION, id)
            .await?
            .map(|document| Versioned::from_document(&document))
            .transpose()
    }

    /// Loads a record, failing with `NotFound` if it doesn't exist.
    pub async fn load(&self, id: Uuid) -> Result<Versioned<T>> {
        self.find(id).await?.ok_or(DomainError::NotFound {
            collection: T::COLLECTION,
            id,
        })
    }

    /// Stores a new record. Fails with a store conflict if one with the same
    /// id already exists.
    pub async fn insert(&self, record: T) -> Result<Versioned<T>> {
        self.save(Versioned::new(record)).await
    }

    /// Saves a record conditionally on its version and returns it at its
    /// new version.
    pub async fn save(&self, versioned: Versioned<T>) -> Result<Versioned<T>> {
        self.store.commit_write(self.stage(&versioned)?).await?;

        tracing::debug!(
            collection = %T::COLLECTION,
            id = %versioned.record.record_id(),
            status = versioned.record.status_name(),
            "record saved"
        );

        Ok(Versioned {
            version: versioned.version.next(),
            record: versioned.record,
        })
    }

    /// Builds the conditional write for a record without committing it, so
    /// it can join a larger unit of work.
    pub fn stage(&self, versioned: &Versioned<T>) -> Result<Write> {
        Ok(Write::PutDocument(versioned.to_document()?))
    }

    /// Builds a write that fails the unit of work unless the record is still
    /// at the version it was loaded at.
    pub fn check(&self, versioned: &Versioned<T>) -> Write {
        Write::CheckDocument {
            collection: T::COLLECTION,
            id: versioned.record.record_id(),
            expected: versioned.version,
        }
    }

    /// Loads a record, applies a change and saves it.
    ///
    /// The change function receives the current record and either mutates it
    /// or rejects the change.
    pub async fn update<F, E>(&self, id: Uuid, change: F) -> Result<Versioned<T>>
    where
        F: FnOnce(&mut T) -> std::result::Result<(), E>,
        DomainError: From<E>,
    {
        let mut versioned = self.load(id).await?;
        change(&mut versioned.record)?;
        self.save(versioned).await
    }

    /// Finds records of this type. The query's collection is forced to the
    /// record type's collection.
    pub async fn find_all(&self, mut query: DocumentQuery) -> Result<Vec<Versioned<T>>> {
        query.collection = T::COLLECTION;
        self.store
            .find_documents(query)
            .await?
            .iter()
            .map(Versioned::from_document)
            .collect()
    }
}
