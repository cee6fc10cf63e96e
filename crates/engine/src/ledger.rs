//! The stock ledger: the only writer of stock counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use stock_store::{
    InventoryStore, InventoryStoreExt, LedgerEntry, MovementKind, OperationId, Reference,
    StockLevel, StockRecord, StockUnit, UnitOfWork, Version, Write,
};

use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;

/// One requested change to a stock unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    pub kind: MovementKind,
    pub unit: StockUnit,
    pub quantity: u64,
    pub reference: Reference,
}

impl Movement {
    pub fn new(kind: MovementKind, unit: StockUnit, quantity: u64, reference: Reference) -> Self {
        Self {
            kind,
            unit,
            quantity,
            reference,
        }
    }

    pub fn reserve(unit: StockUnit, quantity: u64, reference: Reference) -> Self {
        Self::new(MovementKind::Reserve, unit, quantity, reference)
    }

    pub fn release(unit: StockUnit, quantity: u64, reference: Reference) -> Self {
        Self::new(MovementKind::Release, unit, quantity, reference)
    }

    pub fn commit(unit: StockUnit, quantity: u64, reference: Reference) -> Self {
        Self::new(MovementKind::Commit, unit, quantity, reference)
    }

    pub fn debit(unit: StockUnit, quantity: u64, reference: Reference) -> Self {
        Self::new(MovementKind::Debit, unit, quantity, reference)
    }

    pub fn credit(unit: StockUnit, quantity: u64, reference: Reference) -> Self {
        Self::new(MovementKind::Credit, unit, quantity, reference)
    }

    /// The journal key of this movement.
    pub fn operation_id(&self) -> OperationId {
        OperationId::new(self.kind, &self.reference)
    }

    fn settles_reservation(&self) -> bool {
        matches!(self.kind, MovementKind::Release | MovementKind::Commit)
    }

    fn into_entry(self) -> LedgerEntry {
        LedgerEntry::new(self.kind, self.reference, self.unit, self.quantity)
    }
}

/// Applies reserve/release/commit/debit/credit movements to stock records.
///
/// Every movement is a conditional write on the unit's version, journaled in
/// the same unit of work under its operation id. Applying a movement whose
/// operation id is already journaled changes nothing, which makes every
/// primitive safe to retry with the same reference.
pub struct StockLedger<S: InventoryStore> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: InventoryStore> Clone for StockLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry,
        }
    }
}

impl<S: InventoryStore> StockLedger<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Moves `quantity` from available to reserved.
    #[tracing::instrument(skip(self, unit, reference), fields(unit = %unit, reference = %reference))]
    pub async fn reserve(
        &self,
        unit: StockUnit,
        quantity: u64,
        reference: Reference,
    ) -> Result<StockLevel> {
        self.apply_one(Movement::reserve(unit, quantity, reference))
            .await
    }

    /// Returns a reservation to available stock.
    #[tracing::instrument(skip(self, unit, reference), fields(unit = %unit, reference = %reference))]
    pub async fn release(
        &self,
        unit: StockUnit,
        quantity: u64,
        reference: Reference,
    ) -> Result<StockLevel> {
        self.apply_one(Movement::release(unit, quantity, reference))
            .await
    }

    /// Consumes a reservation permanently.
    #[tracing::instrument(skip(self, unit, reference), fields(unit = %unit, reference = %reference))]
    pub async fn commit(
        &self,
        unit: StockUnit,
        quantity: u64,
        reference: Reference,
    ) -> Result<StockLevel> {
        self.apply_one(Movement::commit(unit, quantity, reference))
            .await
    }

    /// Takes `quantity` out of available stock.
    #[tracing::instrument(skip(self, unit, reference), fields(unit = %unit, reference = %reference))]
    pub async fn debit(
        &self,
        unit: StockUnit,
        quantity: u64,
        reference: Reference,
    ) -> Result<StockLevel> {
        self.apply_one(Movement::debit(unit, quantity, reference))
            .await
    }

    /// Adds `quantity` to available stock, creating the record if needed.
    #[tracing::instrument(skip(self, unit, reference), fields(unit = %unit, reference = %reference))]
    pub async fn credit(
        &self,
        unit: StockUnit,
        quantity: u64,
        reference: Reference,
    ) -> Result<StockLevel> {
        self.apply_one(Movement::credit(unit, quantity, reference))
            .await
    }

    /// Current counters of a unit.
    pub async fn level(&self, unit: &StockUnit) -> Result<StockLevel> {
        self.find_level(unit)
            .await?
            .ok_or_else(|| EngineError::stock_not_found(unit))
    }

    /// Current counters of a unit, or None if it has never held stock.
    pub async fn find_level(&self, unit: &StockUnit) -> Result<Option<StockLevel>> {
        Ok(self.store.get_stock(unit).await?.map(|record| record.level))
    }

    /// Applies several movements as one atomic unit, retrying lost races.
    ///
    /// Returns the resulting level of each movement's unit, in order.
    pub async fn apply(&self, movements: Vec<Movement>) -> Result<Vec<StockLevel>> {
        let movements = &movements;
        self.retry
            .run("ledger_apply", |_| async move {
                self.try_apply(movements, Vec::new()).await
            })
            .await
    }

    async fn apply_one(&self, movement: Movement) -> Result<StockLevel> {
        self.apply(vec![movement])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Internal("ledger returned no level".to_string()))
    }

    /// Makes one attempt at applying `movements` together with `extra`
    /// writes in a single unit of work.
    ///
    /// Movements already journaled are skipped. A lost race surfaces as a
    /// store conflict for the caller's retry loop.
    pub(crate) async fn try_apply(
        &self,
        movements: &[Movement],
        extra: Vec<Write>,
    ) -> Result<Vec<StockLevel>> {
        for movement in movements {
            if movement.quantity == 0 {
                return Err(EngineError::InvalidInput(format!(
                    "{} of {} must move a positive quantity",
                    movement.kind, movement.unit
                )));
            }
        }

        let journal = self.load_journal(movements).await?;
        let pending: Vec<&Movement> = movements
            .iter()
            .filter(|m| !journal.contains_key(&m.operation_id()))
            .collect();

        for movement in &pending {
            if movement.settles_reservation() {
                check_reservation(movement, &journal)?;
            }
        }

        let units: Vec<StockUnit> = movements.iter().map(|m| m.unit.clone()).collect();
        let mut working: BTreeMap<StockUnit, (StockLevel, Version)> = self
            .store
            .load_stock(&units)
            .await?
            .into_iter()
            .map(|StockRecord { unit, level, version, .. }| (unit, (level, version)))
            .collect();

        for movement in &pending {
            if !working.contains_key(&movement.unit) {
                if movement.kind != MovementKind::Credit {
                    return Err(EngineError::stock_not_found(&movement.unit));
                }
                working.insert(
                    movement.unit.clone(),
                    (StockLevel::default(), Version::initial()),
                );
            }
            if let Some((level, _)) = working.get_mut(&movement.unit) {
                *level = next_level(movement, *level)?;
            }
        }

        let levels = movements
            .iter()
            .map(|m| {
                working
                    .get(&m.unit)
                    .map(|(level, _)| *level)
                    .ok_or_else(|| EngineError::stock_not_found(&m.unit))
            })
            .collect::<Result<Vec<_>>>()?;

        if pending.is_empty() && extra.is_empty() {
            tracing::debug!("every movement already applied");
            return Ok(levels);
        }

        let mut work = UnitOfWork::new();
        let touched: Vec<&StockUnit> = {
            let mut touched: Vec<&StockUnit> = pending.iter().map(|m| &m.unit).collect();
            touched.sort();
            touched.dedup();
            touched
        };
        for stock in touched {
            if let Some((level, version)) = working.get(stock) {
                work.put_stock(stock.clone(), *level, *version);
            }
        }
        for movement in &pending {
            work.append_entry((*movement).clone().into_entry());
        }
        for write in extra {
            work.push(write);
        }

        self.store.commit(work).await?;

        for movement in &pending {
            metrics::counter!("ledger_operations_total", "kind" => movement.kind.as_str())
                .increment(1);
            tracing::debug!(
                kind = %movement.kind,
                unit = %movement.unit,
                quantity = movement.quantity,
                reference = %movement.reference,
                "movement applied"
            );
        }

        Ok(levels)
    }

    /// Loads the journal entries relevant to `movements`: their own, and for
    /// releases and commits the reservation and the opposite settlement.
    async fn load_journal(
        &self,
        movements: &[Movement],
    ) -> Result<HashMap<OperationId, LedgerEntry>> {
        let mut ids = Vec::new();
        for movement in movements {
            ids.push(movement.operation_id());
            if movement.settles_reservation() {
                ids.push(OperationId::new(MovementKind::Reserve, &movement.reference));
                ids.push(OperationId::new(
                    opposite_settlement(movement.kind),
                    &movement.reference,
                ));
            }
        }
        ids.sort();
        ids.dedup();

        Ok(self
            .store
            .find_entries(&ids)
            .await?
            .into_iter()
            .map(|entry| (entry.operation_id.clone(), entry))
            .collect())
    }
}

fn opposite_settlement(kind: MovementKind) -> MovementKind {
    if kind == MovementKind::Release {
        MovementKind::Commit
    } else {
        MovementKind::Release
    }
}

/// A release or commit must settle an existing, unsettled reservation of
/// the same unit and quantity.
fn check_reservation(movement: &Movement, journal: &HashMap<OperationId, LedgerEntry>) -> Result<()> {
    let opposite = opposite_settlement(movement.kind);
    if journal.contains_key(&OperationId::new(opposite, &movement.reference)) {
        return Err(EngineError::AlreadySettled {
            reference: movement.reference.clone(),
            settled_by: opposite,
        });
    }

    let reservation = journal
        .get(&OperationId::new(MovementKind::Reserve, &movement.reference))
        .ok_or_else(|| EngineError::NoReservation {
            reference: movement.reference.clone(),
            reason: "nothing was reserved".to_string(),
        })?;

    if reservation.unit != movement.unit || reservation.quantity != movement.quantity {
        return Err(EngineError::NoReservation {
            reference: movement.reference.clone(),
            reason: format!(
                "reserved {} of {}, asked to {} {} of {}",
                reservation.quantity, reservation.unit, movement.kind, movement.quantity, movement.unit
            ),
        });
    }
    Ok(())
}

/// Computes the counters after one movement, or why it cannot apply.
fn next_level(movement: &Movement, level: StockLevel) -> Result<StockLevel> {
    let q = movement.quantity;
    let overflow = || EngineError::Internal(format!("stock counter overflow on {}", movement.unit));
    let insufficient_stock = || EngineError::InsufficientStock {
        unit: movement.unit.clone(),
        requested: q,
        available: level.available,
    };
    let insufficient_reserved = || EngineError::InsufficientReserved {
        unit: movement.unit.clone(),
        requested: q,
        reserved: level.reserved,
    };

    match movement.kind {
        MovementKind::Reserve => Ok(StockLevel::new(
            level.available.checked_sub(q).ok_or_else(insufficient_stock)?,
            level.reserved.checked_add(q).ok_or_else(overflow)?,
        )),
        MovementKind::Release => Ok(StockLevel::new(
            level.available.checked_add(q).ok_or_else(overflow)?,
            level.reserved.checked_sub(q).ok_or_else(insufficient_reserved)?,
        )),
        MovementKind::Commit => Ok(StockLevel::new(
            level.available,
            level.reserved.checked_sub(q).ok_or_else(insufficient_reserved)?,
        )),
        MovementKind::Debit => Ok(StockLevel::new(
            level.available.checked_sub(q).ok_or_else(insufficient_stock)?,
            level.reserved,
        )),
        MovementKind::Credit => Ok(StockLevel::new(
            level.available.checked_add(q).ok_or_else(overflow)?,
            level.reserved,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use stock_store::InMemoryStore;

    fn ledger() -> (Arc<InMemoryStore>, StockLedger<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), StockLedger::new(store, RetryPolicy::default()))
    }

    fn line(order: OrderId, line: u32) -> Reference {
        Reference::OrderLine { order, line }
    }

    fn restock(key: &str) -> Reference {
        Reference::External(key.to_string())
    }

    async fn seeded(available: u64) -> (Arc<InMemoryStore>, StockLedger<InMemoryStore>, StockUnit) {
        let (store, ledger) = ledger();
        let unit = StockUnit::product("P");
        ledger
            .credit(unit.clone(), available, restock("seed"))
            .await
            .unwrap();
        (store, ledger, unit)
    }

    #[tokio::test]
    async fn reserve_moves_available_to_reserved() {
        let (_, ledger, unit) = seeded(10).await;
        let level = ledger
            .reserve(unit.clone(), 4, line(OrderId::new(), 0))
            .await
            .unwrap();
        assert_eq!(level, StockLevel::new(6, 4));
        assert_eq!(ledger.level(&unit).await.unwrap(), StockLevel::new(6, 4));
    }

    #[tokio::test]
    async fn reserve_beyond_available_fails_without_change() {
        let (store, ledger, unit) = seeded(10).await;
        let result = ledger.reserve(unit.clone(), 20, line(OrderId::new(), 0)).await;

        match result {
            Err(EngineError::InsufficientStock {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 20);
                assert_eq!(available, 10);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(ledger.level(&unit).await.unwrap(), StockLevel::new(10, 0));
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn release_and_commit_settle_reservations() {
        let (_, ledger, unit) = seeded(10).await;
        let order = OrderId::new();
        ledger.reserve(unit.clone(), 4, line(order, 0)).await.unwrap();
        ledger.reserve(unit.clone(), 3, line(order, 1)).await.unwrap();

        let level = ledger.release(unit.clone(), 4, line(order, 0)).await.unwrap();
        assert_eq!(level, StockLevel::new(7, 3));

        let level = ledger.commit(unit.clone(), 3, line(order, 1)).await.unwrap();
        assert_eq!(level, StockLevel::new(7, 0));
    }

    #[tokio::test]
    async fn repeated_operation_is_a_no_op() {
        let (store, ledger, unit) = seeded(10).await;
        let reference = line(OrderId::new(), 0);

        ledger.reserve(unit.clone(), 4, reference.clone()).await.unwrap();
        let again = ledger.reserve(unit.clone(), 4, reference.clone()).await.unwrap();
        assert_eq!(again, StockLevel::new(6, 4));

        ledger.release(unit.clone(), 4, reference.clone()).await.unwrap();
        let again = ledger.release(unit.clone(), 4, reference).await.unwrap();
        assert_eq!(again, StockLevel::new(10, 0));
        assert_eq!(store.entry_count().await, 3);
    }

    #[tokio::test]
    async fn release_after_commit_is_rejected() {
        let (_, ledger, unit) = seeded(10).await;
        let reference = line(OrderId::new(), 0);
        ledger.reserve(unit.clone(), 2, reference.clone()).await.unwrap();
        ledger.commit(unit.clone(), 2, reference.clone()).await.unwrap();

        let result = ledger.release(unit.clone(), 2, reference).await;
        assert!(matches!(
            result,
            Err(EngineError::AlreadySettled {
                settled_by: MovementKind::Commit,
                ..
            })
        ));
        assert_eq!(ledger.level(&unit).await.unwrap(), StockLevel::new(8, 0));
    }

    #[tokio::test]
    async fn release_requires_matching_reservation() {
        let (_, ledger, unit) = seeded(10).await;
        let reference = line(OrderId::new(), 0);

        let result = ledger.release(unit.clone(), 2, reference.clone()).await;
        assert!(matches!(result, Err(EngineError::NoReservation { .. })));

        ledger.reserve(unit.clone(), 2, reference.clone()).await.unwrap();
        let result = ledger.release(unit.clone(), 5, reference).await;
        assert!(matches!(result, Err(EngineError::NoReservation { .. })));
        assert_eq!(ledger.level(&unit).await.unwrap(), StockLevel::new(8, 2));
    }

    #[tokio::test]
    async fn debit_and_credit_move_available_stock() {
        let (_, ledger) = ledger();
        let unit = StockUnit::product("P");

        let result = ledger.debit(unit.clone(), 1, restock("d0")).await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));

        ledger.credit(unit.clone(), 5, restock("c1")).await.unwrap();
        let level = ledger.debit(unit.clone(), 3, restock("d1")).await.unwrap();
        assert_eq!(level, StockLevel::new(2, 0));

        let result = ledger.debit(unit.clone(), 3, restock("d2")).await;
        assert!(matches!(result, Err(EngineError::InsufficientStock { .. })));
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let (_, ledger, unit) = seeded(10).await;
        let result = ledger.reserve(unit, 0, line(OrderId::new(), 0)).await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn multi_movement_apply_is_atomic() {
        let (_, ledger, unit) = seeded(10).await;
        let other = StockUnit::product("Q");
        let reference = restock("pair");

        let result = ledger
            .apply(vec![
                Movement::debit(unit.clone(), 5, reference.clone()),
                Movement::debit(other.clone(), 5, reference),
            ])
            .await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
        assert_eq!(ledger.level(&unit).await.unwrap(), StockLevel::new(10, 0));
    }

    #[tokio::test]
    async fn movements_on_one_unit_accumulate() {
        let (store, ledger, unit) = seeded(10).await;
        let order = OrderId::new();

        let levels = ledger
            .apply(vec![
                Movement::reserve(unit.clone(), 2, line(order, 0)),
                Movement::reserve(unit.clone(), 3, line(order, 1)),
            ])
            .await
            .unwrap();
        assert_eq!(levels, vec![StockLevel::new(5, 5); 2]);

        let record = store.get_stock(&unit).await.unwrap().unwrap();
        assert_eq!(record.version, Version::new(2));
    }
}
