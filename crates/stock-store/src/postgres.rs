use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::WarehouseId;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Collection, Document, DocumentQuery, LedgerEntry, OperationId, RecordRef, Reference, Result,
    StockLevel, StockRecord, StockUnit, StoreError, Version,
    store::{InventoryStore, UnitOfWork, Write, validate_unit_of_work},
};

const STOCK_COLUMNS: &str = "unit_key, available, reserved, version, updated_at";
const ENTRY_COLUMNS: &str = "operation_id, kind, reference, unit_key, quantity, recorded_at";
const DOCUMENT_COLUMNS: &str = "collection, id, status, version, updated_at, body";

/// PostgreSQL-backed inventory store implementation.
///
/// Every unit of work runs in one transaction. Version checks are expressed
/// as conditional `UPDATE`/`INSERT` statements, so a lost race shows up as
/// zero affected rows and the transaction is rolled back.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_stock(row: PgRow) -> Result<StockRecord> {
        let key: String = row.try_get("unit_key")?;
        let unit = key.parse::<StockUnit>().map_err(StoreError::Corrupt)?;

        Ok(StockRecord {
            unit,
            level: StockLevel::new(
                from_db_quantity(row.try_get("available")?)?,
                from_db_quantity(row.try_get("reserved")?)?,
            ),
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_entry(row: PgRow) -> Result<LedgerEntry> {
        let kind: String = row.try_get("kind")?;
        let reference: String = row.try_get("reference")?;
        let unit_key: String = row.try_get("unit_key")?;
        let operation_id: String = row.try_get("operation_id")?;

        let entry = LedgerEntry {
            operation_id: OperationId::new(
                kind.parse().map_err(StoreError::Corrupt)?,
                &reference.parse::<Reference>().map_err(StoreError::Corrupt)?,
            ),
            kind: kind.parse().map_err(StoreError::Corrupt)?,
            reference: reference.parse().map_err(StoreError::Corrupt)?,
            unit: unit_key.parse().map_err(StoreError::Corrupt)?,
            quantity: from_db_quantity(row.try_get("quantity")?)?,
            recorded_at: row.try_get("recorded_at")?,
        };

        if entry.operation_id.as_str() != operation_id {
            return Err(StoreError::Corrupt(format!(
                "ledger entry {operation_id} does not match its kind and reference"
            )));
        }
        Ok(entry)
    }

    fn row_to_document(row: PgRow) -> Result<Document> {
        let collection: String = row.try_get("collection")?;

        Ok(Document {
            collection: collection.parse().map_err(StoreError::Corrupt)?,
            id: row.try_get::<Uuid, _>("id")?,
            status: row.try_get("status")?,
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            body: row.try_get("body")?,
        })
    }

    async fn put_stock(
        tx: &mut Transaction<'_, Postgres>,
        unit: StockUnit,
        level: StockLevel,
        expected: Version,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = unit.key();
        let available = to_db_quantity(level.available)?;
        let reserved = to_db_quantity(level.reserved)?;

        let affected = if expected == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO stock_records (unit_key, product_id, warehouse_id, available, reserved, version, updated_at)
                VALUES ($1, $2, $3, $4, $5, 1, $6)
                ON CONFLICT (unit_key) DO NOTHING
                "#,
            )
            .bind(&key)
            .bind(unit.product_id().as_str())
            .bind(unit.warehouse_id().map(|w| w.as_uuid()))
            .bind(available)
            .bind(reserved)
            .bind(now)
            .execute(&mut **tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE stock_records
                SET available = $2, reserved = $3, version = version + 1, updated_at = $4
                WHERE unit_key = $1 AND version = $5
                "#,
            )
            .bind(&key)
            .bind(available)
            .bind(reserved)
            .bind(now)
            .bind(expected.as_i64())
            .execute(&mut **tx)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM stock_records WHERE unit_key = $1")
                    .bind(&key)
                    .fetch_optional(&mut **tx)
                    .await?;
            return Err(StoreError::ConcurrencyConflict {
                record: RecordRef::Stock(unit),
                expected,
                actual: Version::new(actual.unwrap_or(0)),
            });
        }
        Ok(())
    }

    async fn append_entry(tx: &mut Transaction<'_, Postgres>, entry: LedgerEntry) -> Result<()> {
        let affected = sqlx::query(
            r#"
            INSERT INTO ledger_entries (operation_id, kind, reference, unit_key, quantity, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (operation_id) DO NOTHING
            "#,
        )
        .bind(entry.operation_id.as_str())
        .bind(entry.kind.as_str())
        .bind(entry.reference.to_string())
        .bind(entry.unit.key())
        .bind(to_db_quantity(entry.quantity)?)
        .bind(entry.recorded_at)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::DuplicateEntry(entry.operation_id));
        }
        Ok(())
    }

    async fn put_document(tx: &mut Transaction<'_, Postgres>, document: Document) -> Result<()> {
        let expected = document.version;

        let affected = if expected == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO documents (collection, id, status, version, updated_at, body)
                VALUES ($1, $2, $3, 1, $4, $5)
                ON CONFLICT (collection, id) DO NOTHING
                "#,
            )
            .bind(document.collection.as_str())
            .bind(document.id)
            .bind(&document.status)
            .bind(document.updated_at)
            .bind(&document.body)
            .execute(&mut **tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE documents
                SET status = $3, version = version + 1, updated_at = $4, body = $5
                WHERE collection = $1 AND id = $2 AND version = $6
                "#,
            )
            .bind(document.collection.as_str())
            .bind(document.id)
            .bind(&document.status)
            .bind(document.updated_at)
            .bind(&document.body)
            .bind(expected.as_i64())
            .execute(&mut **tx)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            let actual: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2",
            )
            .bind(document.collection.as_str())
            .bind(document.id)
            .fetch_optional(&mut **tx)
            .await?;
            return Err(StoreError::ConcurrencyConflict {
                record: RecordRef::Document(document.collection, document.id),
                expected,
                actual: Version::new(actual.unwrap_or(0)),
            });
        }
        Ok(())
    }

    async fn check_document(
        tx: &mut Transaction<'_, Postgres>,
        collection: Collection,
        id: Uuid,
        expected: Version,
    ) -> Result<()> {
        // FOR SHARE blocks a concurrent writer of the row until we commit
        let actual: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR SHARE",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        let actual = Version::new(actual.unwrap_or(0));
        if actual != expected {
            return Err(StoreError::ConcurrencyConflict {
                record: RecordRef::Document(collection, id),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

fn to_db_quantity(quantity: u64) -> Result<i64> {
    i64::try_from(quantity).map_err(|_| {
        StoreError::InvalidUnitOfWork(format!("quantity {quantity} exceeds storage range"))
    })
}

fn from_db_quantity(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative quantity {value}")))
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn load_stock(&self, units: &[StockUnit]) -> Result<Vec<StockRecord>> {
        let keys: Vec<String> = units.iter().map(StockUnit::key).collect();
        let rows = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE unit_key = ANY($1)"
        ))
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_stock).collect()
    }

    async fn stock_for_warehouse(&self, warehouse: WarehouseId) -> Result<Vec<StockRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE warehouse_id = $1 ORDER BY unit_key"
        ))
        .bind(warehouse.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_stock).collect()
    }

    async fn find_entries(&self, ids: &[OperationId]) -> Result<Vec<LedgerEntry>> {
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE operation_id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn unsettled_reservations(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT e.operation_id, e.kind, e.reference, e.unit_key, e.quantity, e.recorded_at
            FROM ledger_entries e
            WHERE e.kind = 'reserve'
              AND e.reference LIKE 'order:%'
              AND e.recorded_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM ledger_entries s
                  WHERE s.operation_id IN ('release:' || e.reference, 'commit:' || e.reference)
              )
            ORDER BY e.seq ASC
            LIMIT $2
            "#,
        )
        .bind(before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn get_document(&self, collection: Collection, id: Uuid) -> Result<Option<Document>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = $1 AND id = $2"
        ))
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn find_documents(&self, query: DocumentQuery) -> Result<Vec<Document>> {
        let mut sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = $1");
        let mut param_count = 1;

        // Build dynamic query
        if query.statuses.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ANY(${param_count})"));
        }
        if query.updated_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND updated_at < ${param_count}"));
        }
        if query.field.is_some() {
            sql.push_str(&format!(
                " AND body ->> ${} = ${}",
                param_count + 1,
                param_count + 2
            ));
            param_count += 2;
        }

        sql.push_str(" ORDER BY updated_at ASC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql).bind(query.collection.as_str());

        if let Some(statuses) = query.statuses {
            sqlx_query = sqlx_query.bind(statuses);
        }
        if let Some(before) = query.updated_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some((name, value)) = query.field {
            sqlx_query = sqlx_query.bind(name).bind(value);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_document).collect()
    }

    #[tracing::instrument(skip(self, unit), fields(writes = unit.len()))]
    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        validate_unit_of_work(&unit)?;

        let now = Utc::now();

        // Start a transaction; dropping it on error rolls everything back
        let mut tx = self.pool.begin().await?;

        for write in unit.into_writes() {
            let applied = match write {
                Write::PutStock {
                    unit,
                    level,
                    expected,
                } => Self::put_stock(&mut tx, unit, level, expected, now).await,
                Write::AppendEntry(entry) => Self::append_entry(&mut tx, entry).await,
                Write::PutDocument(document) => Self::put_document(&mut tx, document).await,
                Write::CheckDocument {
                    collection,
                    id,
                    expected,
                } => Self::check_document(&mut tx, collection, id, expected).await,
            };

            if let Err(e) = applied {
                if e.is_conflict() {
                    metrics::counter!("store_commit_conflicts_total").increment(1);
                    tracing::debug!(error = %e, "unit of work lost a race");
                }
                return Err(e);
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
