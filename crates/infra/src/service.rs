//! Stock service: the flows an external controller invokes.
//!
//! Ordering for a movement:
//! load product → build movement → field checks → validate → apply delta →
//! persist product → persist movement (product delta reverted if that fails).
//!
//! Every read-validate-write sequence runs under one service-wide mutex, so two
//! withdrawals can never both pass the sufficiency check against the same stock.
//! Timestamps and the validation date come from the service's [`Clock`].

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use stockroom_core::{DomainError, ValueObject};
use stockroom_inventory::{MovementError, MovementKind, StockMovement};
use stockroom_products::{Category, NewProduct, Product, ProductChanges, ProductId};

use crate::clock::{Clock, SystemClock};
use crate::store::{MovementStore, ProductStore, StoreError};

/// What `delete_product` does with a product's movements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Delete the movements first, then the product.
    #[default]
    Cascade,
    /// Refuse to delete a product that has movements.
    Restrict,
}

impl core::str::FromStr for DeletePolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cascade" => Ok(DeletePolicy::Cascade),
            "restrict" => Ok(DeletePolicy::Restrict),
            other => Err(DomainError::validation(format!(
                "unknown delete policy '{other}' (expected cascade or restrict)"
            ))),
        }
    }
}

/// Command: record a stock movement against a product.
///
/// `quantity` is optional because it arrives from untrusted input; an absent
/// quantity is rejected like a non-positive one. There is no timestamp: the
/// service stamps the movement with its own clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: Option<i64>,
    pub lot: Option<String>,
    pub expiry: Option<NaiveDate>,
    pub note: Option<String>,
}

impl RecordMovement {
    pub fn inbound(product_id: ProductId, quantity: i64) -> Self {
        Self::new(product_id, MovementKind::Inbound, quantity)
    }

    pub fn outbound(product_id: ProductId, quantity: i64) -> Self {
        Self::new(product_id, MovementKind::Outbound, quantity)
    }

    fn new(product_id: ProductId, kind: MovementKind, quantity: i64) -> Self {
        Self {
            product_id,
            kind,
            quantity: Some(quantity),
            lot: None,
            expiry: None,
            note: None,
        }
    }

    pub fn with_lot(mut self, lot: impl Into<String>) -> Self {
        self.lot = Some(lot.into());
        self
    }

    pub fn with_expiry(mut self, expiry: NaiveDate) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("SKU '{0}' is already registered")]
    DuplicateSku(String),

    #[error("product {product_id} has {movements} movement(s); delete policy is restrict")]
    HasMovements {
        product_id: ProductId,
        movements: usize,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Movement(#[from] MovementError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateSku(sku) => ServiceError::DuplicateSku(sku),
            StoreError::UnknownProduct(id) => ServiceError::ProductNotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Product registration, stock movements and lookups over one store.
#[derive(Debug)]
pub struct StockService<S, C = SystemClock> {
    store: S,
    clock: C,
    delete_policy: DeletePolicy,
    write_lock: Mutex<()>,
}

impl<S> StockService<S>
where
    S: ProductStore + MovementStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: SystemClock,
            delete_policy: DeletePolicy::default(),
            write_lock: Mutex::new(()),
        }
    }
}

impl<S, C> StockService<S, C>
where
    S: ProductStore + MovementStore,
    C: Clock,
{
    pub fn with_clock<C2: Clock>(self, clock: C2) -> StockService<S, C2> {
        StockService {
            store: self.store,
            clock,
            delete_policy: self.delete_policy,
            write_lock: self.write_lock,
        }
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The guarded value is `()`, so a panic in an earlier holder leaves nothing
    /// half-written behind the lock and the guard is recovered.
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("recovering stock service lock after a panicked writer");
            self.write_lock.clear_poison();
            poisoned.into_inner()
        })
    }

    fn load(&self, id: ProductId) -> ServiceResult<Product> {
        self.store
            .get_product(id)?
            .ok_or(ServiceError::ProductNotFound(id))
    }

    /// Validate and persist a new product with zero stock.
    #[instrument(skip(self), fields(sku = %cmd.sku), err)]
    pub fn register_product(&self, cmd: NewProduct) -> ServiceResult<Product> {
        let product = Product::create(cmd, self.clock.now())?;

        let _guard = self.lock();
        if self.store.exists_by_sku(product.sku().as_str())? {
            return Err(ServiceError::DuplicateSku(product.sku().to_string()));
        }
        let product = self.store.insert_product(product)?;

        tracing::info!(product_id = %product.id_typed(), "product registered");
        Ok(product)
    }

    #[instrument(skip(self), err)]
    pub fn update_product(&self, id: ProductId, changes: ProductChanges) -> ServiceResult<Product> {
        let _guard = self.lock();
        let mut product = self.load(id)?;
        product.apply_changes(changes)?;
        self.store.update_product(&product)?;
        Ok(product)
    }

    /// Delete a product, handling its movements according to the delete policy.
    ///
    /// Returns the number of movements removed alongside it.
    #[instrument(skip(self), err)]
    pub fn delete_product(&self, id: ProductId) -> ServiceResult<usize> {
        let _guard = self.lock();
        self.load(id)?;

        let movements = self.store.count_movements_of(id)?;
        if movements > 0 && self.delete_policy == DeletePolicy::Restrict {
            return Err(ServiceError::HasMovements {
                product_id: id,
                movements,
            });
        }

        let removed = if movements > 0 {
            self.store.delete_movements_of(id)?
        } else {
            0
        };
        self.store.delete_product(id)?;

        tracing::info!(product_id = %id, movements_removed = removed, "product deleted");
        Ok(removed)
    }

    pub fn product(&self, id: ProductId) -> ServiceResult<Product> {
        self.load(id)
    }

    pub fn product_by_sku(&self, sku: &str) -> ServiceResult<Option<Product>> {
        Ok(self.store.find_by_sku(sku.trim())?)
    }

    pub fn products(&self) -> ServiceResult<Vec<Product>> {
        Ok(self.store.list_products()?)
    }

    pub fn products_by_category(&self, category: Category) -> ServiceResult<Vec<Product>> {
        Ok(self.store.find_by_category(category)?)
    }

    pub fn search_products(&self, name: &str) -> ServiceResult<Vec<Product>> {
        Ok(self.store.find_by_name_contains(name)?)
    }

    pub fn low_stock_products(&self) -> ServiceResult<Vec<Product>> {
        Ok(self.store.find_low_stock()?)
    }

    /// Validate a movement, apply its delta to the product and persist both.
    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product_id, kind = %cmd.kind, quantity = ?cmd.quantity),
        err
    )]
    pub fn record(&self, cmd: RecordMovement) -> ServiceResult<StockMovement> {
        let quantity = cmd
            .quantity
            .ok_or(MovementError::InvalidQuantity { quantity: None })?;

        let _guard = self.lock();
        let mut product = self.load(cmd.product_id)?;

        let now = self.clock.now();
        let mut movement = StockMovement::new(product.id_typed(), cmd.kind, quantity, now);
        if let Some(lot) = cmd.lot {
            movement = movement.with_lot(lot);
        }
        if let Some(expiry) = cmd.expiry {
            movement = movement.with_expiry(expiry);
        }
        if let Some(note) = cmd.note {
            movement = movement.with_note(note);
        }

        movement.check_fields()?;
        if let Err(err) = movement.validate_at(&product, now.date_naive()) {
            tracing::warn!(error = %err, "movement rejected");
            return Err(err.into());
        }

        movement.apply_to(&mut product);
        self.store.update_product(&product)?;

        match self.store.insert_movement(movement.clone()) {
            Ok(stored) => {
                tracing::info!(
                    movement_id = %stored.id_typed(),
                    current_quantity = product.current_quantity(),
                    "movement applied"
                );
                Ok(stored)
            }
            Err(err) => {
                movement.revert_on(&mut product);
                if let Err(rollback) = self.store.update_product(&product) {
                    tracing::error!(error = %rollback, "failed to restore product quantity");
                }
                Err(err.into())
            }
        }
    }

    pub fn movements(&self) -> ServiceResult<Vec<StockMovement>> {
        Ok(self.store.list_movements()?)
    }

    pub fn movements_for_product(&self, id: ProductId) -> ServiceResult<Vec<StockMovement>> {
        self.load(id)?;
        Ok(self.store.find_by_product(id)?)
    }

    pub fn movements_by_kind(&self, kind: MovementKind) -> ServiceResult<Vec<StockMovement>> {
        Ok(self.store.find_by_kind(kind)?)
    }

    pub fn movements_by_lot(&self, lot: &str) -> ServiceResult<Vec<StockMovement>> {
        Ok(self.store.find_by_lot(lot)?)
    }

    /// Movements in `[start, end]`, optionally restricted to one product.
    pub fn movements_in_period(
        &self,
        product_id: Option<ProductId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ServiceResult<Vec<StockMovement>> {
        if end < start {
            return Err(DomainError::validation("period end is before its start").into());
        }
        let movements = match product_id {
            Some(id) => self.store.find_by_product_and_period(id, start, end)?,
            None => self.store.find_by_date_range(start, end)?,
        };
        Ok(movements)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    use crate::clock::ManualClock;
    use crate::store::InMemoryStockStore;

    use super::*;

    type TestService = StockService<InMemoryStockStore, Arc<ManualClock>>;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap()
    }

    fn day(offset: i64) -> NaiveDate {
        start().date_naive() + Duration::days(offset)
    }

    fn new_product(sku: &str, category: Category) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            category,
            unit_price: Decimal::new(250, 2),
            minimum_quantity: 2,
        }
    }

    fn service_with_clock() -> (TestService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let service = StockService::new(InMemoryStockStore::new()).with_clock(clock.clone());
        (service, clock)
    }

    fn service() -> TestService {
        service_with_clock().0
    }

    fn stocked(service: &TestService, sku: &str, quantity: i64) -> Product {
        let product = service
            .register_product(new_product(sku, Category::NonPerishable))
            .unwrap();
        service
            .record(RecordMovement::inbound(product.id_typed(), quantity))
            .unwrap();
        service.product(product.id_typed()).unwrap()
    }

    #[test]
    fn register_rejects_duplicate_sku() {
        let service = service();
        let first = service
            .register_product(new_product("A1", Category::Perishable))
            .unwrap();
        assert_eq!(first.created_at(), start());

        let err = service
            .register_product(new_product(" A1 ", Category::NonPerishable))
            .unwrap_err();
        assert_eq!(err, ServiceError::DuplicateSku("A1".to_string()));
    }

    #[test]
    fn register_validates_fields() {
        let mut cmd = new_product("B2", Category::NonPerishable);
        cmd.name = "   ".to_string();
        assert!(matches!(
            service().register_product(cmd),
            Err(ServiceError::Domain(DomainError::Validation(_)))
        ));
    }

    #[test]
    fn inbound_then_outbound_updates_quantity() {
        let service = service();
        let product = stocked(&service, "C3", 10);
        assert_eq!(product.current_quantity(), 10);

        service
            .record(RecordMovement::outbound(product.id_typed(), 4).with_note("order 17"))
            .unwrap();

        assert_eq!(service.product(product.id_typed()).unwrap().current_quantity(), 6);
        assert_eq!(service.movements_for_product(product.id_typed()).unwrap().len(), 2);
    }

    #[test]
    fn movements_are_stamped_by_the_service_clock() {
        let (service, clock) = service_with_clock();
        let product = stocked(&service, "C4", 1);

        clock.advance(Duration::minutes(90));
        let movement = service
            .record(RecordMovement::inbound(product.id_typed(), 1))
            .unwrap();

        assert_eq!(movement.moved_at(), start() + Duration::minutes(90));
    }

    #[test]
    fn rejected_outbound_leaves_stock_untouched() {
        let service = service();
        let product = stocked(&service, "D4", 5);

        let err = service
            .record(RecordMovement::outbound(product.id_typed(), 8))
            .unwrap_err();

        assert_eq!(
            err,
            ServiceError::Movement(MovementError::InsufficientStock {
                available: 5,
                requested: 8,
            })
        );
        assert_eq!(service.product(product.id_typed()).unwrap().current_quantity(), 5);
        assert_eq!(service.movements().unwrap().len(), 1);
    }

    #[test]
    fn missing_quantity_is_invalid() {
        let service = service();
        let product = stocked(&service, "E5", 1);
        let mut cmd = RecordMovement::inbound(product.id_typed(), 1);
        cmd.quantity = None;

        assert_eq!(
            service.record(cmd).unwrap_err(),
            ServiceError::Movement(MovementError::InvalidQuantity { quantity: None })
        );
    }

    #[test]
    fn perishable_inbound_needs_lot_and_future_expiry() {
        let service = service();
        let milk = service
            .register_product(new_product("MILK", Category::Perishable))
            .unwrap();
        let id = milk.id_typed();

        assert_eq!(
            service.record(RecordMovement::inbound(id, 3)).unwrap_err(),
            ServiceError::Movement(MovementError::MissingLot)
        );
        assert_eq!(
            service
                .record(RecordMovement::inbound(id, 3).with_lot("L1"))
                .unwrap_err(),
            ServiceError::Movement(MovementError::MissingExpiry)
        );
        assert!(matches!(
            service.record(RecordMovement::inbound(id, 3).with_lot("L1").with_expiry(day(-1))),
            Err(ServiceError::Movement(MovementError::ExpiredOnEntry { .. }))
        ));

        let accepted = service
            .record(RecordMovement::inbound(id, 3).with_lot("L1").with_expiry(day(0)))
            .unwrap();
        assert_eq!(accepted.lot(), Some("L1"));
        assert_eq!(service.product(id).unwrap().current_quantity(), 3);
        assert_eq!(service.movements_by_lot("L1").unwrap().len(), 1);
    }

    #[test]
    fn expiry_is_judged_against_the_clock_date() {
        let (service, clock) = service_with_clock();
        let milk = service
            .register_product(new_product("MILK2", Category::Perishable))
            .unwrap();
        let lot = || {
            RecordMovement::inbound(milk.id_typed(), 5)
                .with_lot("L")
                .with_expiry(day(1))
        };

        service.record(lot()).unwrap();

        clock.advance(Duration::days(2));
        assert_eq!(
            service.record(lot()).unwrap_err(),
            ServiceError::Movement(MovementError::ExpiredOnEntry {
                expiry: day(1),
                today: day(2),
            })
        );
        assert_eq!(service.product(milk.id_typed()).unwrap().current_quantity(), 5);
    }

    #[test]
    fn overflowing_inbound_is_rejected_and_service_stays_usable() {
        let service = service();
        let product = stocked(&service, "O1", 1);

        assert_eq!(
            service
                .record(RecordMovement::inbound(product.id_typed(), i64::MAX))
                .unwrap_err(),
            ServiceError::Movement(MovementError::QuantityOverflow {
                current: 1,
                quantity: i64::MAX,
            })
        );
        assert_eq!(service.product(product.id_typed()).unwrap().current_quantity(), 1);
        assert!(service
            .register_product(new_product("O2", Category::NonPerishable))
            .is_ok());
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let service = Arc::new(service());
        let holder = Arc::clone(&service);
        let panicked = std::thread::spawn(move || {
            let _guard = holder.write_lock.lock().unwrap();
            panic!("writer failed mid-operation");
        })
        .join()
        .is_err();
        assert!(panicked);
        assert!(service.write_lock.is_poisoned());

        let product = stocked(&service, "P9", 3);
        assert_eq!(product.current_quantity(), 3);
        assert!(!service.write_lock.is_poisoned());
    }

    #[test]
    fn unknown_product_is_not_found() {
        let id = ProductId::new();
        assert_eq!(
            service().record(RecordMovement::inbound(id, 1)).unwrap_err(),
            ServiceError::ProductNotFound(id)
        );
    }

    #[test]
    fn update_applies_changes() {
        let service = service();
        let product = stocked(&service, "F6", 3);

        let updated = service
            .update_product(
                product.id_typed(),
                ProductChanges {
                    name: "Renamed".to_string(),
                    category: Category::NonPerishable,
                    unit_price: Decimal::new(999, 2),
                    minimum_quantity: 5,
                },
            )
            .unwrap();

        assert_eq!(updated.name(), "Renamed");
        assert_eq!(updated.current_quantity(), 3);
        assert!(updated.is_low_stock());
        assert_eq!(service.low_stock_products().unwrap(), vec![updated]);
    }

    #[test]
    fn cascade_delete_removes_movements() {
        let service = service();
        let product = stocked(&service, "G7", 4);

        assert_eq!(service.delete_product(product.id_typed()).unwrap(), 1);
        assert!(service.products().unwrap().is_empty());
        assert!(service.movements().unwrap().is_empty());
    }

    #[test]
    fn restrict_delete_refuses_when_movements_exist() {
        let service = service().with_delete_policy(DeletePolicy::Restrict);
        let product = stocked(&service, "H8", 4);

        assert_eq!(
            service.delete_product(product.id_typed()).unwrap_err(),
            ServiceError::HasMovements {
                product_id: product.id_typed(),
                movements: 1,
            }
        );

        let idle = service
            .register_product(new_product("H9", Category::NonPerishable))
            .unwrap();
        assert_eq!(service.delete_product(idle.id_typed()).unwrap(), 0);
    }

    #[test]
    fn period_queries_check_bounds() {
        let service = service();
        let product = stocked(&service, "J1", 2);

        let in_range = service
            .movements_in_period(Some(product.id_typed()), start() - Duration::hours(1), start())
            .unwrap();
        assert_eq!(in_range.len(), 1);

        assert!(matches!(
            service.movements_in_period(None, start(), start() - Duration::hours(1)),
            Err(ServiceError::Domain(DomainError::Validation(_)))
        ));
    }

    #[test]
    fn delete_policy_parses_from_text() {
        assert_eq!("Cascade".parse::<DeletePolicy>().unwrap(), DeletePolicy::Cascade);
        assert_eq!(" restrict ".parse::<DeletePolicy>().unwrap(), DeletePolicy::Restrict);
        assert!("shred".parse::<DeletePolicy>().is_err());
    }

    #[test]
    fn concurrent_withdrawals_never_oversell() {
        let service = Arc::new(service());
        let product = stocked(&service, "K2", 10);
        let id = product.id_typed();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || service.record(RecordMovement::outbound(id, 1)).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 10);
        assert_eq!(service.product(id).unwrap().current_quantity(), 0);
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        fn movement() -> impl Strategy<Value = (bool, i64)> {
            (any::<bool>(), -5i64..30)
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

            #[test]
            fn quantity_matches_accepted_history(moves in prop::collection::vec(movement(), 0..25)) {
                let service = service();
                let product = service
                    .register_product(new_product("P1", Category::NonPerishable))
                    .unwrap();
                let id = product.id_typed();

                let mut expected = 0i64;
                for (inbound, quantity) in moves {
                    let cmd = if inbound {
                        RecordMovement::inbound(id, quantity)
                    } else {
                        RecordMovement::outbound(id, quantity)
                    };
                    let accepted = service.record(cmd).is_ok();
                    let valid = quantity > 0 && (inbound || quantity <= expected);
                    prop_assert_eq!(accepted, valid);
                    if accepted {
                        expected += if inbound { quantity } else { -quantity };
                    }
                }

                let stored = service.product(id).unwrap();
                prop_assert_eq!(stored.current_quantity(), expected);
                prop_assert!(stored.current_quantity() >= 0);

                let replayed: i64 = service
                    .movements_for_product(id)
                    .unwrap()
                    .iter()
                    .map(|m| match m.kind() {
                        MovementKind::Inbound => m.quantity(),
                        MovementKind::Outbound => -m.quantity(),
                    })
                    .sum();
                prop_assert_eq!(replayed, expected);
            }
        }
    }
}
