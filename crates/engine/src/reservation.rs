//! Order lifecycle on top of the stock ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ShopId};
use domain::{Order, OrderLine, OrderStatus, Record, Repository, Versioned, Warehouse};
use stock_store::{InventoryStore, LedgerEntry, Reference, StockUnit, Write};

use crate::error::{EngineError, Result};
use crate::ledger::{Movement, StockLedger};
use crate::retry::RetryPolicy;
use crate::warehouse::active_warehouse_checks;

/// Request to create an order.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub customer_id: CustomerId,
    pub shop_id: ShopId,
    pub lines: Vec<OrderLine>,
}

impl CreateOrderRequest {
    pub fn new(customer_id: CustomerId, shop_id: ShopId, lines: Vec<OrderLine>) -> Self {
        Self {
            customer_id,
            shop_id,
            lines,
        }
    }
}

/// Drives orders through `Pending → Processing → Completed` or
/// `→ Cancelled`, keeping the ledger's reservations in step.
///
/// Every change that moves stock for an order is one unit of work holding
/// the movements, the order document at its loaded version and a version
/// check on each warehouse the movements reserve from. A persisted Pending
/// or Processing order therefore always has every line reserved, and a
/// Completed or Cancelled order has every line committed or released.
pub struct ReservationCoordinator<S: InventoryStore> {
    ledger: StockLedger<S>,
    orders: Repository<S, Order>,
    warehouses: Repository<S, Warehouse>,
    retry: RetryPolicy,
}

impl<S: InventoryStore> Clone for ReservationCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            orders: self.orders.clone(),
            warehouses: self.warehouses.clone(),
            retry: self.retry,
        }
    }
}

impl<S: InventoryStore> ReservationCoordinator<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self {
            ledger: StockLedger::new(Arc::clone(&store), retry),
            orders: Repository::new(Arc::clone(&store)),
            warehouses: Repository::new(store),
            retry,
        }
    }

    /// Reserves every line and stores the order as Pending, all or nothing.
    ///
    /// If a line cannot be reserved the error names that line's stock unit
    /// and nothing is written.
    #[tracing::instrument(skip(self, request), fields(customer_id = %request.customer_id, lines = request.lines.len()))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        let order = Order::new(
            OrderId::new(),
            request.customer_id,
            request.shop_id,
            request.lines,
            Utc::now(),
        )?;

        let order = &order;
        self.retry
            .run("create_order", |_| async move {
                let mut writes = self.warehouse_checks(order.lines()).await?;
                writes.push(self.orders.stage(&Versioned::new(order.clone()))?);

                let movements = line_movements(order, Movement::reserve);
                self.ledger.try_apply(&movements, writes).await?;
                Ok(())
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(order_id = %order.id(), error = %e, "order not created");
            })?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id(),
            total = %order.total_amount(),
            "order created"
        );
        Ok(order.clone())
    }

    /// Replaces the lines of a Pending order.
    ///
    /// Lines that are unchanged keep their reservation. Removed and changed
    /// lines are released and new ones reserved in the same unit of work as
    /// the updated order, so a shortfall on any new line leaves the order
    /// and its stock exactly as they were.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn update_order(&self, id: OrderId, lines: Vec<OrderLine>) -> Result<Order> {
        let lines = &lines;
        let (order, changes) = self
            .retry
            .run("update_order", |_| async move {
                let mut order = self.orders.load(id.as_uuid()).await?;
                let changes = order.record.replace_lines(lines.clone(), Utc::now())?;

                let mut writes = self
                    .warehouse_checks(changes.reserved.iter().map(|(_, line)| line))
                    .await?;
                writes.push(self.orders.stage(&order)?);

                let movements: Vec<Movement> = changes
                    .released
                    .iter()
                    .map(|(reference, line)| line_movement(Movement::release, reference, line))
                    .chain(
                        changes
                            .reserved
                            .iter()
                            .map(|(reference, line)| line_movement(Movement::reserve, reference, line)),
                    )
                    .collect();
                self.ledger.try_apply(&movements, writes).await?;
                Ok((order.into_inner(), changes))
            })
            .await?;

        metrics::counter!("orders_updated_total").increment(1);
        tracing::info!(
            order_id = %id,
            released = changes.released.len(),
            reserved = changes.reserved.len(),
            total = %order.total_amount(),
            "order updated"
        );
        Ok(order)
    }

    /// Pending → Processing. No stock moves.
    #[tracing::instrument(skip(self))]
    pub async fn process_order(&self, id: OrderId) -> Result<Order> {
        let orders = &self.orders;
        let order = self
            .retry
            .run("process_order", |_| async move {
                Ok(orders
                    .update(id.as_uuid(), |order| order.start_processing(Utc::now()))
                    .await?)
            })
            .await?;

        tracing::info!(order_id = %id, "order processing");
        Ok(order.into_inner())
    }

    /// Processing → Completed, committing every line's reservation in the
    /// same unit of work.
    ///
    /// A line that cannot be committed fails the call with `CommitFailed`
    /// and leaves the order Processing with its stock untouched.
    #[tracing::instrument(skip(self))]
    pub async fn complete_order(&self, id: OrderId) -> Result<Order> {
        let order = self
            .retry
            .run("complete_order", |_| async move {
                let mut order = self.orders.load(id.as_uuid()).await?;
                order.record.complete(Utc::now())?;

                let movements = line_movements(&order, Movement::commit);
                let staged = self.orders.stage(&order)?;
                match self.ledger.try_apply(&movements, vec![staged]).await {
                    Ok(_) => Ok(order.into_inner()),
                    Err(e) if e.is_conflict() => Err(e),
                    Err(source) => {
                        tracing::error!(order_id = %id, error = %source, "committing reserved stock failed");
                        Err(EngineError::CommitFailed {
                            order_id: id,
                            source: Box::new(source),
                        })
                    }
                }
            })
            .await?;

        tracing::info!(order_id = %id, "order completed");
        Ok(order)
    }

    /// Marks the order Cancelled and releases its reservations in the same
    /// unit of work.
    ///
    /// Cancelling a Completed order is refused, as is cancelling an order
    /// with a line already committed. Cancelling an order that is already
    /// Cancelled returns it unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, id: OrderId) -> Result<Order> {
        let order = self
            .retry
            .run("cancel_order", |_| async move {
                let order = self.orders.load(id.as_uuid()).await?;
                if order.status() == OrderStatus::Cancelled {
                    return Ok(order.into_inner());
                }
                self.try_cancel(order).await
            })
            .await?;

        tracing::info!(order_id = %id, lines = order.lines().len(), "order cancelled");
        Ok(order)
    }

    /// Loads an order.
    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        Ok(self.orders.load(id.as_uuid()).await?.into_inner())
    }

    /// Orders placed by a customer, least recently updated first.
    pub async fn orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let query = self
            .orders
            .query()
            .field_equals("customer_id", customer_id.to_string());
        self.find_orders(query).await
    }

    /// Orders placed with a shop, least recently updated first.
    pub async fn orders_for_shop(&self, shop_id: ShopId) -> Result<Vec<Order>> {
        let query = self
            .orders
            .query()
            .field_equals("shop_id", shop_id.to_string());
        self.find_orders(query).await
    }

    /// Pending orders last touched before `deadline`, oldest first.
    pub(crate) async fn stale_orders(
        &self,
        deadline: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OrderId>> {
        let query = self
            .orders
            .query()
            .status(OrderStatus::Pending.as_str())
            .updated_before(deadline)
            .limit(limit);
        Ok(self
            .orders
            .find_all(query)
            .await?
            .into_iter()
            .map(|order| order.id())
            .collect())
    }

    /// Cancels an order if it is still Pending and was last touched before
    /// `deadline`. Returns whether this call cancelled it.
    pub(crate) async fn cancel_expired(&self, id: OrderId, deadline: DateTime<Utc>) -> Result<bool> {
        let cancelled = self
            .retry
            .run("cancel_expired", |_| async move {
                let order = self.orders.load(id.as_uuid()).await?;
                if order.status() != OrderStatus::Pending || order.updated_at() >= deadline {
                    return Ok(false);
                }
                self.try_cancel(order).await?;
                Ok(true)
            })
            .await?;

        if cancelled {
            tracing::info!(order_id = %id, "expired order cancelled");
        }
        Ok(cancelled)
    }

    /// Releases a journaled reservation whose order was never stored or
    /// was cancelled. Returns whether stock was released.
    pub(crate) async fn reclaim_reservation(&self, entry: &LedgerEntry) -> Result<bool> {
        let Some(order_id) = entry.reference.order_id() else {
            return Ok(false);
        };

        let status = self
            .orders
            .find(order_id.as_uuid())
            .await?
            .map(|order| order.status());
        if !matches!(status, None | Some(OrderStatus::Cancelled)) {
            return Ok(false);
        }

        match self
            .ledger
            .release(entry.unit.clone(), entry.quantity, entry.reference.clone())
            .await
        {
            Ok(_) => {
                tracing::info!(
                    reference = %entry.reference,
                    unit = %entry.unit,
                    quantity = entry.quantity,
                    order_found = status.is_some(),
                    "orphaned reservation released"
                );
                Ok(true)
            }
            Err(EngineError::AlreadySettled { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find_orders(&self, query: stock_store::DocumentQuery) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .find_all(query)
            .await?
            .into_iter()
            .map(Versioned::into_inner)
            .collect())
    }

    /// One attempt at cancelling a loaded order and releasing every line.
    async fn try_cancel(&self, mut order: Versioned<Order>) -> Result<Order> {
        order.record.cancel(Utc::now())?;
        let movements = line_movements(&order, Movement::release);
        self.ledger
            .try_apply(&movements, vec![self.orders.stage(&order)?])
            .await?;
        Ok(order.into_inner())
    }

    /// Active checks for every warehouse the lines reserve from.
    pub(crate) async fn warehouse_checks<'a>(
        &self,
        lines: impl IntoIterator<Item = &'a OrderLine>,
    ) -> Result<Vec<Write>> {
        active_warehouse_checks(
            &self.warehouses,
            lines.into_iter().filter_map(|line| line.warehouse_id),
        )
        .await
    }
}

fn line_movement(
    make: fn(StockUnit, u64, Reference) -> Movement,
    reference: &Reference,
    line: &OrderLine,
) -> Movement {
    make(line.stock_unit(), u64::from(line.quantity), reference.clone())
}

/// One movement per line of the order.
fn line_movements(order: &Order, make: fn(StockUnit, u64, Reference) -> Movement) -> Vec<Movement> {
    order
        .line_references()
        .map(|(reference, line)| line_movement(make, &reference, line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::WarehouseId;
    use domain::{DomainError, Money, WarehouseStatus};
    use stock_store::{InMemoryStore, StockLevel, StoreError};

    async fn setup(
        stock: &[(&str, u64)],
    ) -> (ReservationCoordinator<InMemoryStore>, StockLedger<InMemoryStore>) {
        setup_in(Arc::new(InMemoryStore::new()), stock).await
    }

    async fn setup_in(
        store: Arc<InMemoryStore>,
        stock: &[(&str, u64)],
    ) -> (ReservationCoordinator<InMemoryStore>, StockLedger<InMemoryStore>) {
        let ledger = StockLedger::new(Arc::clone(&store), RetryPolicy::default());
        for (sku, quantity) in stock {
            ledger
                .credit(
                    StockUnit::product(*sku),
                    *quantity,
                    Reference::External(format!("seed-{sku}")),
                )
                .await
                .unwrap();
        }
        (ReservationCoordinator::new(store, RetryPolicy::default()), ledger)
    }

    fn request(lines: Vec<OrderLine>) -> CreateOrderRequest {
        CreateOrderRequest::new(CustomerId::new(), ShopId::new(), lines)
    }

    fn line(sku: &str, quantity: u32) -> OrderLine {
        OrderLine::new(sku, quantity, Money::from_cents(250))
    }

    async fn level(ledger: &StockLedger<InMemoryStore>, sku: &str) -> StockLevel {
        ledger.level(&StockUnit::product(sku)).await.unwrap()
    }

    #[tokio::test]
    async fn failed_line_reserves_nothing() {
        let (coordinator, ledger) = setup(&[("A", 10), ("B", 1)]).await;

        let result = coordinator
            .create_order(request(vec![line("A", 4), line("B", 5)]))
            .await;

        match result {
            Err(EngineError::InsufficientStock { unit, .. }) => {
                assert_eq!(unit, StockUnit::product("B"));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(level(&ledger, "A").await, StockLevel::new(10, 0));
        assert_eq!(level(&ledger, "B").await, StockLevel::new(1, 0));
    }

    #[tokio::test]
    async fn crash_while_creating_leaves_no_reservation_behind() {
        let store = Arc::new(InMemoryStore::new());
        let (coordinator, ledger) = setup_in(Arc::clone(&store), &[("A", 10), ("B", 10)]).await;
        let customer = CustomerId::new();
        let entries_before = store.entry_count().await;

        store.inject_commit_fault(1).await;
        let result = coordinator
            .create_order(CreateOrderRequest::new(
                customer,
                ShopId::new(),
                vec![line("A", 4), line("B", 5)],
            ))
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Store(StoreError::Unavailable(_)))
        ));
        assert_eq!(level(&ledger, "A").await, StockLevel::new(10, 0));
        assert_eq!(level(&ledger, "B").await, StockLevel::new(10, 0));
        assert_eq!(store.entry_count().await, entries_before);
        assert!(coordinator.orders_for_customer(customer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_order_reserves_nothing() {
        let (coordinator, ledger) = setup(&[("A", 10)]).await;

        let result = coordinator
            .create_order(request(vec![line("A", 4), line("A", 0)]))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        assert_eq!(level(&ledger, "A").await, StockLevel::new(10, 0));
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_enforced() {
        let (coordinator, _) = setup(&[("A", 10)]).await;
        let order = coordinator
            .create_order(request(vec![line("A", 1)]))
            .await
            .unwrap();

        let result = coordinator.complete_order(order.id()).await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));

        coordinator.process_order(order.id()).await.unwrap();
        let result = coordinator.process_order(order.id()).await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));

        let completed = coordinator.complete_order(order.id()).await.unwrap();
        assert_eq!(completed.status(), OrderStatus::Completed);

        let result = coordinator.cancel_order(order.id()).await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
    }

    #[tokio::test]
    async fn processing_order_can_be_cancelled() {
        let (coordinator, ledger) = setup(&[("A", 10)]).await;
        let order = coordinator
            .create_order(request(vec![line("A", 3)]))
            .await
            .unwrap();
        coordinator.process_order(order.id()).await.unwrap();

        let cancelled = coordinator.cancel_order(order.id()).await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(level(&ledger, "A").await, StockLevel::new(10, 0));
    }

    #[tokio::test]
    async fn cancel_after_a_line_was_committed_is_refused() {
        let (coordinator, ledger) = setup(&[("P", 10)]).await;
        let order = coordinator
            .create_order(request(vec![line("P", 4)]))
            .await
            .unwrap();
        coordinator.process_order(order.id()).await.unwrap();

        // The first line's commit lands before the cancel is attempted
        ledger
            .commit(StockUnit::product("P"), 4, order.line_reference(0))
            .await
            .unwrap();

        let result = coordinator.cancel_order(order.id()).await;
        assert!(matches!(result, Err(EngineError::AlreadySettled { .. })));
        assert_eq!(
            coordinator.get_order(order.id()).await.unwrap().status(),
            OrderStatus::Processing
        );

        let completed = coordinator.complete_order(order.id()).await.unwrap();
        assert_eq!(completed.status(), OrderStatus::Completed);
        assert_eq!(
            coordinator.get_order(order.id()).await.unwrap().status(),
            OrderStatus::Completed
        );
        assert_eq!(level(&ledger, "P").await, StockLevel::new(6, 0));
    }

    #[tokio::test]
    async fn complete_after_cancel_moves_no_stock() {
        let (coordinator, ledger) = setup(&[("P", 10)]).await;
        let order = coordinator
            .create_order(request(vec![line("P", 4)]))
            .await
            .unwrap();
        coordinator.process_order(order.id()).await.unwrap();
        coordinator.cancel_order(order.id()).await.unwrap();

        let result = coordinator.complete_order(order.id()).await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert_eq!(level(&ledger, "P").await, StockLevel::new(10, 0));

        // Cancelling again changes nothing
        let again = coordinator.cancel_order(order.id()).await.unwrap();
        assert_eq!(again.status(), OrderStatus::Cancelled);
        assert_eq!(level(&ledger, "P").await, StockLevel::new(10, 0));
    }

    #[tokio::test]
    async fn update_swaps_only_changed_lines() {
        let (coordinator, ledger) = setup(&[("A", 10), ("B", 10), ("C", 10)]).await;
        let order = coordinator
            .create_order(request(vec![line("A", 2), line("B", 3)]))
            .await
            .unwrap();

        let updated = coordinator
            .update_order(order.id(), vec![line("B", 3), line("C", 6)])
            .await
            .unwrap();

        assert_eq!(updated.status(), OrderStatus::Pending);
        assert_eq!(updated.total_amount(), Money::from_cents(9 * 250));
        assert_eq!(level(&ledger, "A").await, StockLevel::new(10, 0));
        assert_eq!(level(&ledger, "B").await, StockLevel::new(7, 3));
        assert_eq!(level(&ledger, "C").await, StockLevel::new(4, 6));
        assert_eq!(coordinator.get_order(order.id()).await.unwrap(), updated);

        // The new lines settle like any other
        coordinator.process_order(order.id()).await.unwrap();
        coordinator.complete_order(order.id()).await.unwrap();
        assert_eq!(level(&ledger, "B").await, StockLevel::new(7, 0));
        assert_eq!(level(&ledger, "C").await, StockLevel::new(4, 0));
    }

    #[tokio::test]
    async fn update_can_grow_a_line_using_its_own_released_stock() {
        let (coordinator, ledger) = setup(&[("A", 5)]).await;
        let order = coordinator
            .create_order(request(vec![line("A", 4)]))
            .await
            .unwrap();

        // Needs the 4 held by the old line plus 1 free
        coordinator
            .update_order(order.id(), vec![line("A", 5)])
            .await
            .unwrap();
        assert_eq!(level(&ledger, "A").await, StockLevel::new(0, 5));
    }

    #[tokio::test]
    async fn failed_update_leaves_order_and_stock_untouched() {
        let (coordinator, ledger) = setup(&[("A", 10), ("B", 1)]).await;
        let order = coordinator
            .create_order(request(vec![line("A", 4)]))
            .await
            .unwrap();

        let result = coordinator
            .update_order(order.id(), vec![line("B", 2)])
            .await;
        assert!(matches!(result, Err(EngineError::InsufficientStock { .. })));
        assert_eq!(coordinator.get_order(order.id()).await.unwrap(), order);
        assert_eq!(level(&ledger, "A").await, StockLevel::new(6, 4));
        assert_eq!(level(&ledger, "B").await, StockLevel::new(1, 0));

        let result = coordinator.update_order(order.id(), vec![]).await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));

        coordinator.process_order(order.id()).await.unwrap();
        let result = coordinator
            .update_order(order.id(), vec![line("A", 1)])
            .await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert_eq!(level(&ledger, "A").await, StockLevel::new(6, 4));
    }

    #[tokio::test]
    async fn deactivation_after_the_active_check_fails_the_reservation() {
        let store = Arc::new(InMemoryStore::new());
        let (coordinator, ledger) = setup_in(Arc::clone(&store), &[]).await;
        let warehouses = Repository::<_, Warehouse>::new(Arc::clone(&store));
        let warehouse = Warehouse::new(WarehouseId::new(), "North", "Oslo", Utc::now()).unwrap();
        let id = warehouse.id();
        warehouses.insert(warehouse).await.unwrap();
        let unit = StockUnit::in_warehouse(id, "A");
        ledger
            .credit(unit.clone(), 10, Reference::External("seed".into()))
            .await
            .unwrap();

        let item = line("A", 3).from_warehouse(id);
        let checks = coordinator.warehouse_checks([&item]).await.unwrap();

        warehouses
            .update(id.as_uuid(), |w| {
                w.set_status(WarehouseStatus::Inactive, Utc::now());
                Ok::<_, DomainError>(())
            })
            .await
            .unwrap();

        let reference = Reference::OrderLine {
            order: OrderId::new(),
            line: 0,
        };
        let result = ledger
            .try_apply(&[Movement::reserve(unit.clone(), 3, reference)], checks)
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Store(StoreError::ConcurrencyConflict { .. }))
        ));
        assert_eq!(ledger.level(&unit).await.unwrap(), StockLevel::new(10, 0));

        let result = coordinator.create_order(request(vec![item])).await;
        assert!(matches!(result, Err(EngineError::InactiveWarehouse(_))));
        assert_eq!(ledger.level(&unit).await.unwrap(), StockLevel::new(10, 0));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let (coordinator, _) = setup(&[]).await;
        let result = coordinator.cancel_order(OrderId::new()).await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn orders_are_queryable_by_customer_and_shop() {
        let (coordinator, _) = setup(&[("A", 10)]).await;
        let customer = CustomerId::new();
        let shop = ShopId::new();

        for _ in 0..2 {
            coordinator
                .create_order(CreateOrderRequest::new(customer, shop, vec![line("A", 1)]))
                .await
                .unwrap();
        }
        coordinator
            .create_order(request(vec![line("A", 1)]))
            .await
            .unwrap();

        assert_eq!(coordinator.orders_for_customer(customer).await.unwrap().len(), 2);
        assert_eq!(coordinator.orders_for_shop(shop).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reclaims_reservation_without_order() {
        let (coordinator, ledger) = setup(&[("A", 10)]).await;
        let reference = Reference::OrderLine {
            order: OrderId::new(),
            line: 0,
        };
        ledger
            .reserve(StockUnit::product("A"), 4, reference.clone())
            .await
            .unwrap();

        let entry = LedgerEntry::new(
            stock_store::MovementKind::Reserve,
            reference,
            StockUnit::product("A"),
            4,
        );
        assert!(coordinator.reclaim_reservation(&entry).await.unwrap());
        assert_eq!(level(&ledger, "A").await, StockLevel::new(10, 0));

        // A second pass finds the release journaled and moves nothing
        coordinator.reclaim_reservation(&entry).await.unwrap();
        assert_eq!(level(&ledger, "A").await, StockLevel::new(10, 0));
    }
}
