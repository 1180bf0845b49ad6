//! Integration tests for the stock pipeline.
//!
//! Tests: StockService → ProductStore/MovementStore → InventoryReports
//!
//! Verifies:
//! - Movements are validated against the stored product before any write
//! - Product quantity and movement history stay consistent, including when a write fails
//! - Delete policies and reports see the same data the service wrote

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use stockroom_inventory::{MovementError, MovementId, MovementKind, StockMovement};
    use stockroom_products::{Category, NewProduct, Product, ProductId};

    use crate::clock::ManualClock;
    use crate::config::StockConfig;
    use crate::reports::InventoryReports;
    use crate::service::{DeletePolicy, RecordMovement, ServiceError, StockService};
    use crate::store::{InMemoryStockStore, MovementStore, ProductStore, StoreError};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn new_product(sku: &str, category: Category, minimum: i64) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            category,
            unit_price: Decimal::new(1990, 2),
            minimum_quantity: minimum,
        }
    }

    type Service = StockService<Arc<InMemoryStockStore>, Arc<ManualClock>>;

    fn setup() -> (Service, InventoryReports<Arc<InMemoryStockStore>>, Arc<ManualClock>) {
        stockroom_observability::init_for_tests();
        let store = Arc::new(InMemoryStockStore::new());
        let clock = Arc::new(ManualClock::new(now()));
        let config = StockConfig::default();
        (
            config.service(store.clone()).with_clock(clock.clone()),
            config.reports(store),
            clock,
        )
    }

    #[test]
    fn perishable_withdrawals_are_checked_against_stock() {
        let (service, _, _) = setup();
        let a1 = service
            .register_product(new_product("A1", Category::Perishable, 10))
            .unwrap();
        let id = a1.id_typed();
        let expiry = today() + Duration::days(10);

        service
            .record(RecordMovement::inbound(id, 5).with_lot("L0").with_expiry(expiry))
            .unwrap();

        let err = service
            .record(RecordMovement::outbound(id, 8).with_lot("L1").with_expiry(expiry))
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Movement(MovementError::InsufficientStock {
                available: 5,
                requested: 8,
            })
        );

        service
            .record(RecordMovement::outbound(id, 3).with_lot("L1").with_expiry(expiry))
            .unwrap();

        let product = service.product(id).unwrap();
        assert_eq!(product.current_quantity(), 2);
        assert!(product.is_low_stock());
        assert_eq!(service.movements_for_product(id).unwrap().len(), 2);
    }

    #[test]
    fn non_perishable_inbound_needs_no_lot() {
        let (service, _, _) = setup();
        let bolt = service
            .register_product(new_product("BOLT", Category::NonPerishable, 0))
            .unwrap();

        let movement = service
            .record(RecordMovement::inbound(bolt.id_typed(), 10))
            .unwrap();

        assert_eq!(movement.lot(), None);
        assert_eq!(movement.expiry(), None);
        assert_eq!(service.product(bolt.id_typed()).unwrap().current_quantity(), 10);
        assert!(!service.product(bolt.id_typed()).unwrap().is_low_stock());
    }

    #[test]
    fn queries_reflect_recorded_history() {
        let (service, _, clock) = setup();
        let bolt = service
            .register_product(new_product("BOLT", Category::NonPerishable, 0))
            .unwrap();
        let nut = service
            .register_product(new_product("NUT", Category::NonPerishable, 0))
            .unwrap();

        for hours in 0..3 {
            clock.set(now() + Duration::hours(hours));
            service
                .record(RecordMovement::inbound(bolt.id_typed(), 5))
                .unwrap();
        }
        clock.set(now());
        service
            .record(RecordMovement::inbound(nut.id_typed(), 1))
            .unwrap();
        clock.set(now() + Duration::hours(5));
        service
            .record(RecordMovement::outbound(bolt.id_typed(), 2))
            .unwrap();

        let history = service.movements_for_product(bolt.id_typed()).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].kind(), MovementKind::Outbound);
        assert!(history.windows(2).all(|w| w[0].moved_at() >= w[1].moved_at()));

        assert_eq!(service.movements_by_kind(MovementKind::Outbound).unwrap().len(), 1);
        assert_eq!(
            service
                .movements_in_period(None, now() + Duration::hours(1), now() + Duration::hours(2))
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            service
                .movements_in_period(Some(nut.id_typed()), now(), now() + Duration::hours(5))
                .unwrap()
                .len(),
            1
        );

        assert_eq!(service.search_products("bOl").unwrap(), vec![service.product(bolt.id_typed()).unwrap()]);
        assert_eq!(
            service.product_by_sku("NUT").unwrap().map(|p| p.id_typed()),
            Some(nut.id_typed())
        );
        assert_eq!(service.products_by_category(Category::Perishable).unwrap().len(), 0);
    }

    #[test]
    fn delete_policies_handle_movements_explicitly() {
        let store = Arc::new(InMemoryStockStore::new());
        let cascade = StockService::new(store.clone());
        let restrict = StockService::new(store.clone()).with_delete_policy(DeletePolicy::Restrict);

        let crate_product = cascade
            .register_product(new_product("CRATE", Category::NonPerishable, 0))
            .unwrap();
        let id = crate_product.id_typed();
        cascade.record(RecordMovement::inbound(id, 4)).unwrap();
        cascade.record(RecordMovement::outbound(id, 1)).unwrap();

        assert_eq!(
            store.delete_product(id).unwrap_err(),
            StoreError::Referenced {
                product_id: id,
                movements: 2,
            }
        );
        assert!(matches!(
            restrict.delete_product(id),
            Err(ServiceError::HasMovements { movements: 2, .. })
        ));

        assert_eq!(cascade.delete_product(id).unwrap(), 2);
        assert!(store.get_product(id).unwrap().is_none());
        assert!(store.find_by_product(id).unwrap().is_empty());
        assert_eq!(cascade.product(id).unwrap_err(), ServiceError::ProductNotFound(id));
    }

    #[test]
    fn reports_follow_recorded_movements() {
        let (service, reports, _) = setup();
        let yogurt = service
            .register_product(new_product("YOG", Category::Perishable, 20))
            .unwrap();
        let id = yogurt.id_typed();

        service
            .record(
                RecordMovement::inbound(id, 6)
                    .with_lot("Y-SOON")
                    .with_expiry(today() + Duration::days(2)),
            )
            .unwrap();
        service
            .record(
                RecordMovement::inbound(id, 4)
                    .with_lot("Y-LATE")
                    .with_expiry(today() + Duration::days(40)),
            )
            .unwrap();

        assert_eq!(reports.total_stock_value().unwrap(), Decimal::new(19900, 2));
        assert_eq!(reports.low_stock().unwrap().len(), 1);

        let dashboard = reports.dashboard(today()).unwrap();
        assert_eq!(dashboard.near_expiry_count, 1);
        assert_eq!(dashboard.near_expiry[0].lot.as_deref(), Some("Y-SOON"));
        assert_eq!(dashboard.near_expiry[0].product_name.as_deref(), Some("Product YOG"));
        assert_eq!(dashboard.expired_count, 0);

        let later = reports.dashboard(today() + Duration::days(3)).unwrap();
        assert_eq!(later.expired_count, 1);
        assert_eq!(later.expired[0].lot.as_deref(), Some("Y-SOON"));
    }

    /// Wraps the in-memory store and fails every movement insert.
    struct FailingMovementWrites {
        inner: InMemoryStockStore,
    }

    impl ProductStore for FailingMovementWrites {
        fn insert_product(&self, product: Product) -> Result<Product, StoreError> {
            self.inner.insert_product(product)
        }
        fn update_product(&self, product: &Product) -> Result<(), StoreError> {
            self.inner.update_product(product)
        }
        fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
            self.inner.delete_product(id)
        }
        fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
            self.inner.get_product(id)
        }
        fn list_products(&self) -> Result<Vec<Product>, StoreError> {
            self.inner.list_products()
        }
        fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
            self.inner.find_by_sku(sku)
        }
        fn exists_by_sku(&self, sku: &str) -> Result<bool, StoreError> {
            self.inner.exists_by_sku(sku)
        }
        fn find_by_category(&self, category: Category) -> Result<Vec<Product>, StoreError> {
            self.inner.find_by_category(category)
        }
        fn find_low_stock(&self) -> Result<Vec<Product>, StoreError> {
            self.inner.find_low_stock()
        }
        fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Product>, StoreError> {
            self.inner.find_by_name_contains(needle)
        }
    }

    impl MovementStore for FailingMovementWrites {
        fn insert_movement(&self, _movement: StockMovement) -> Result<StockMovement, StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }
        fn get_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
            self.inner.get_movement(id)
        }
        fn list_movements(&self) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.list_movements()
        }
        fn count_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError> {
            self.inner.count_movements_of(product_id)
        }
        fn delete_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError> {
            self.inner.delete_movements_of(product_id)
        }
        fn find_by_product(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.find_by_product(product_id)
        }
        fn find_by_kind(&self, kind: MovementKind) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.find_by_kind(kind)
        }
        fn find_by_lot(&self, lot: &str) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.find_by_lot(lot)
        }
        fn find_by_date_range(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.find_by_date_range(start, end)
        }
        fn find_near_expiry(
            &self,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.find_near_expiry(start, end)
        }
        fn find_expired_at(&self, today: NaiveDate) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.find_expired_at(today)
        }
        fn find_by_product_and_period(
            &self,
            product_id: ProductId,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.find_by_product_and_period(product_id, start, end)
        }
    }

    #[test]
    fn failed_movement_write_restores_product_quantity() {
        let service = StockService::new(FailingMovementWrites {
            inner: InMemoryStockStore::new(),
        });
        let product = service
            .register_product(new_product("TAPE", Category::NonPerishable, 0))
            .unwrap();

        let err = service
            .record(RecordMovement::inbound(product.id_typed(), 7))
            .unwrap_err();

        assert_eq!(
            err,
            ServiceError::Store(StoreError::Backend("disk full".to_string()))
        );
        assert_eq!(service.product(product.id_typed()).unwrap().current_quantity(), 0);
        assert!(service.movements().unwrap().is_empty());
    }
}
