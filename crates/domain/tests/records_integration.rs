//! Integration tests for domain records stored through the repository.
//!
//! These tests verify record lifecycles, version checking between
//! concurrent writers, and document queries.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CustomerId, OrderId, ShopId, TransferId, WarehouseId};
use domain::{
    DomainError, Money, Order, OrderError, OrderLine, OrderStatus, Repository, StockTransfer,
    TransferStatus, Warehouse,
};
use stock_store::{Collection, InMemoryStore, InventoryStore, StoreError, Version};

fn store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

fn order_for(customer_id: CustomerId) -> Order {
    Order::new(
        OrderId::new(),
        customer_id,
        ShopId::new(),
        vec![
            OrderLine::new("SKU-001", 2, Money::from_cents(1000)),
            OrderLine::new("SKU-002", 1, Money::from_cents(500)).from_warehouse(WarehouseId::new()),
        ],
        Utc::now(),
    )
    .unwrap()
}

mod order_lifecycle {
    use super::*;

    #[tokio::test]
    async fn complete_order_lifecycle() {
        let orders = Repository::<_, Order>::new(store());
        let order = order_for(CustomerId::new());
        let id = order.id().as_uuid();
        assert_eq!(order.total_amount(), Money::from_cents(2500));

        let saved = orders.insert(order).await.unwrap();
        assert_eq!(saved.version, Version::first());

        orders
            .update(id, |o| o.start_processing(Utc::now()))
            .await
            .unwrap();
        let completed = orders
            .update(id, |o| o.complete(Utc::now()))
            .await
            .unwrap();

        assert_eq!(completed.status(), OrderStatus::Completed);
        assert_eq!(completed.version, Version::new(3));

        let result = orders.update(id, |o| o.cancel(Utc::now())).await;
        assert!(matches!(
            result,
            Err(DomainError::Order(OrderError::InvalidStateTransition {
                current_state: OrderStatus::Completed,
                action: "cancel",
            }))
        ));
    }

    #[tokio::test]
    async fn lines_keep_their_references_after_reload() {
        let orders = Repository::<_, Order>::new(store());
        let order = order_for(CustomerId::new());
        let id = order.id();
        let expected: Vec<_> = order.line_references().map(|(r, _)| r).collect();
        orders.insert(order).await.unwrap();

        let loaded = orders.load(id.as_uuid()).await.unwrap();
        let references: Vec<_> = loaded.line_references().map(|(r, _)| r).collect();
        assert_eq!(references, expected);
        assert_eq!(references[1].to_string(), format!("order:{id}:1"));
        assert!(loaded.lines()[1].warehouse_id.is_some());
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn stale_writer_loses() {
        let orders = Repository::<_, Order>::new(store());
        let order = order_for(CustomerId::new());
        let id = order.id().as_uuid();
        orders.insert(order).await.unwrap();

        let mut first = orders.load(id).await.unwrap();
        let mut second = orders.load(id).await.unwrap();

        first.record.start_processing(Utc::now()).unwrap();
        orders.save(first).await.unwrap();

        second.record.cancel(Utc::now()).unwrap();
        let result = orders.save(second).await;
        assert!(matches!(
            result,
            Err(DomainError::Store(StoreError::ConcurrencyConflict { .. }))
        ));
        assert_eq!(orders.load(id).await.unwrap().status(), OrderStatus::Processing);
    }

    #[tokio::test]
    async fn transfer_resolves_once_across_writers() {
        let transfers = Repository::<_, StockTransfer>::new(store());
        let transfer = StockTransfer::new(
            TransferId::new(),
            "SKU-001",
            WarehouseId::new(),
            WarehouseId::new(),
            10,
            Utc::now(),
        )
        .unwrap();
        let id = transfer.id().as_uuid();
        transfers.insert(transfer).await.unwrap();

        let mut completer = transfers.load(id).await.unwrap();
        let mut expirer = transfers.load(id).await.unwrap();

        completer.record.complete(Utc::now()).unwrap();
        transfers.save(completer).await.unwrap();

        expirer.record.fail("expired", Utc::now()).unwrap();
        assert!(transfers.save(expirer).await.is_err());
        assert_eq!(
            transfers.load(id).await.unwrap().status(),
            TransferStatus::Completed
        );
    }
}

mod queries {
    use super::*;

    #[tokio::test]
    async fn orders_by_customer_and_age() {
        let store = store();
        let orders = Repository::<_, Order>::new(Arc::clone(&store));
        let customer = CustomerId::new();
        orders.insert(order_for(customer)).await.unwrap();
        orders.insert(order_for(customer)).await.unwrap();
        orders.insert(order_for(CustomerId::new())).await.unwrap();

        let mine = orders
            .find_all(orders.query().field_equals("customer_id", customer.to_string()))
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|o| o.customer_id() == customer));

        let stale = orders
            .find_all(
                orders
                    .query()
                    .status(OrderStatus::Pending.as_str())
                    .updated_before(Utc::now() + Duration::minutes(1))
                    .limit(2),
            )
            .await
            .unwrap();
        assert_eq!(stale.len(), 2);

        let none = orders
            .find_all(orders.query().updated_before(Utc::now() - Duration::minutes(1)))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn collections_do_not_mix() {
        let store = store();
        let warehouses = Repository::<_, Warehouse>::new(Arc::clone(&store));
        let orders = Repository::<_, Order>::new(Arc::clone(&store));

        let warehouse = Warehouse::new(WarehouseId::new(), "North", "Oslo", Utc::now()).unwrap();
        let id = warehouse.id().as_uuid();
        warehouses.insert(warehouse).await.unwrap();

        assert!(orders.find(id).await.unwrap().is_none());
        let document = store
            .get_document(Collection::Warehouses, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.status, "Active");
        assert_eq!(warehouses.find_all(warehouses.query()).await.unwrap().len(), 1);
    }
}
