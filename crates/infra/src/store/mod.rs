//! Store contracts for products and stock movements.
//!
//! The traits are synchronous and backend-agnostic; `InMemoryStockStore` backs
//! tests/dev and `PostgresStockStore` is the relational backend.
//!
//! Stores never cascade: deleting a product that still has movements fails with
//! [`StoreError::Referenced`]. Removing dependents first is the caller's job
//! (see `StockService::delete_product`).

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use stockroom_inventory::{MovementId, MovementKind, StockMovement};
use stockroom_products::{Category, Product, ProductId};

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Store operation error.
///
/// Infrastructure failures and storage-level constraint violations, as opposed
/// to domain errors (validation, invariants).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("a product with SKU '{0}' already exists")]
    DuplicateSku(String),

    #[error("product {0} does not exist")]
    UnknownProduct(ProductId),

    #[error("product {product_id} is still referenced by {movements} movement(s)")]
    Referenced {
        product_id: ProductId,
        movements: usize,
    },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("stored row is invalid: {0}")]
    Corrupt(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Lookup/filter operations over products, plus the writes the service layer needs.
pub trait ProductStore: Send + Sync {
    /// Persist a new product. Fails with `DuplicateSku` when the SKU is taken.
    fn insert_product(&self, product: Product) -> Result<Product, StoreError>;

    /// Overwrite an existing product. Fails with `NotFound` when absent.
    fn update_product(&self, product: &Product) -> Result<(), StoreError>;

    /// Delete a product with no remaining movements.
    fn delete_product(&self, id: ProductId) -> Result<(), StoreError>;

    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Exact SKU match.
    fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError>;

    fn exists_by_sku(&self, sku: &str) -> Result<bool, StoreError>;

    fn find_by_category(&self, category: Category) -> Result<Vec<Product>, StoreError>;

    /// Products with `current_quantity < minimum_quantity`.
    fn find_low_stock(&self) -> Result<Vec<Product>, StoreError>;

    /// Products whose name contains `needle`, ignoring case.
    fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Product>, StoreError>;
}

/// Lookup/filter operations over stock movements.
///
/// Unless stated otherwise, sequences are ordered by movement timestamp, newest first.
pub trait MovementStore: Send + Sync {
    /// Persist a movement. Fails with `UnknownProduct` when its product is missing.
    fn insert_movement(&self, movement: StockMovement) -> Result<StockMovement, StoreError>;

    fn get_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError>;

    fn list_movements(&self) -> Result<Vec<StockMovement>, StoreError>;

    /// Number of movements recorded against a product.
    fn count_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError>;

    /// Remove every movement of a product; returns how many were removed.
    fn delete_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError>;

    fn find_by_product(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError>;

    fn find_by_kind(&self, kind: MovementKind) -> Result<Vec<StockMovement>, StoreError>;

    /// Movements sharing a lot code (exact match). Order is unspecified.
    fn find_by_lot(&self, lot: &str) -> Result<Vec<StockMovement>, StoreError>;

    /// Movements with `start <= moved_at <= end`.
    fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// Movements with an expiry date in `[start, end]`, earliest expiry first.
    fn find_near_expiry(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// Movements with an expiry date strictly before `today`, earliest expiry first.
    fn find_expired_at(&self, today: NaiveDate) -> Result<Vec<StockMovement>, StoreError>;

    /// [`MovementStore::find_expired_at`] as of today's UTC date.
    fn find_expired(&self) -> Result<Vec<StockMovement>, StoreError> {
        self.find_expired_at(Utc::now().date_naive())
    }

    /// One product's movements with `start <= moved_at <= end`.
    fn find_by_product_and_period(
        &self,
        product_id: ProductId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, StoreError>;
}

/// Both store contracts behind one object, for callers that pick the backend at runtime.
pub trait StockStore: ProductStore + MovementStore {}

impl<S> StockStore for S where S: ProductStore + MovementStore + ?Sized {}

pub type SharedStockStore = Arc<dyn StockStore>;

impl<S> ProductStore for Arc<S>
where
    S: ProductStore + ?Sized,
{
    fn insert_product(&self, product: Product) -> Result<Product, StoreError> {
        (**self).insert_product(product)
    }

    fn update_product(&self, product: &Product) -> Result<(), StoreError> {
        (**self).update_product(product)
    }

    fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
        (**self).delete_product(id)
    }

    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(id)
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list_products()
    }

    fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        (**self).find_by_sku(sku)
    }

    fn exists_by_sku(&self, sku: &str) -> Result<bool, StoreError> {
        (**self).exists_by_sku(sku)
    }

    fn find_by_category(&self, category: Category) -> Result<Vec<Product>, StoreError> {
        (**self).find_by_category(category)
    }

    fn find_low_stock(&self) -> Result<Vec<Product>, StoreError> {
        (**self).find_low_stock()
    }

    fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Product>, StoreError> {
        (**self).find_by_name_contains(needle)
    }
}

impl<S> MovementStore for Arc<S>
where
    S: MovementStore + ?Sized,
{
    fn insert_movement(&self, movement: StockMovement) -> Result<StockMovement, StoreError> {
        (**self).insert_movement(movement)
    }

    fn get_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        (**self).get_movement(id)
    }

    fn list_movements(&self) -> Result<Vec<StockMovement>, StoreError> {
        (**self).list_movements()
    }

    fn count_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError> {
        (**self).count_movements_of(product_id)
    }

    fn delete_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError> {
        (**self).delete_movements_of(product_id)
    }

    fn find_by_product(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError> {
        (**self).find_by_product(product_id)
    }

    fn find_by_kind(&self, kind: MovementKind) -> Result<Vec<StockMovement>, StoreError> {
        (**self).find_by_kind(kind)
    }

    fn find_by_lot(&self, lot: &str) -> Result<Vec<StockMovement>, StoreError> {
        (**self).find_by_lot(lot)
    }

    fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).find_by_date_range(start, end)
    }

    fn find_near_expiry(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).find_near_expiry(start, end)
    }

    fn find_expired_at(&self, today: NaiveDate) -> Result<Vec<StockMovement>, StoreError> {
        (**self).find_expired_at(today)
    }

    fn find_by_product_and_period(
        &self,
        product_id: ProductId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).find_by_product_and_period(product_id, start, end)
    }
}
