use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, Utc};

use stockroom_core::ValueObject;
use stockroom_inventory::{MovementId, MovementKind, StockMovement};
use stockroom_products::{Category, Product, ProductId};

use super::{MovementStore, ProductStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    movements: HashMap<MovementId, StockMovement>,
}

impl Tables {
    fn movement_count(&self, product_id: ProductId) -> usize {
        self.movements
            .values()
            .filter(|m| m.product_id() == product_id)
            .count()
    }

    fn select_products(&self, pred: impl Fn(&Product) -> bool) -> Vec<Product> {
        let mut out: Vec<Product> = self.products.values().filter(|p| pred(*p)).cloned().collect();
        out.sort_by_key(|p| (p.created_at(), p.id_typed()));
        out
    }

    /// Newest movement first.
    fn select_movements(&self, pred: impl Fn(&StockMovement) -> bool) -> Vec<StockMovement> {
        let mut out: Vec<StockMovement> =
            self.movements.values().filter(|m| pred(*m)).cloned().collect();
        out.sort_by_key(|m| Reverse((m.moved_at(), m.id_typed())));
        out
    }

    /// Earliest expiry first.
    fn select_by_expiry(&self, pred: impl Fn(NaiveDate) -> bool) -> Vec<StockMovement> {
        let mut out: Vec<StockMovement> = self
            .movements
            .values()
            .filter(|m| m.expiry().is_some_and(&pred))
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.expiry(), m.id_typed()));
        out
    }
}

/// In-memory product + movement store.
///
/// Intended for tests/dev. Both tables sit behind one lock so the
/// product/movement reference checks see a consistent view.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    tables: RwLock<Tables>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

impl ProductStore for InMemoryStockStore {
    fn insert_product(&self, product: Product) -> Result<Product, StoreError> {
        let mut tables = self.write()?;
        let sku = product.sku().as_str();
        if tables.products.values().any(|p| p.sku().as_str() == sku) {
            return Err(StoreError::DuplicateSku(sku.to_string()));
        }
        tables.products.insert(product.id_typed(), product.clone());
        Ok(product)
    }

    fn update_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let id = product.id_typed();
        let sku = product.sku().as_str();
        if tables
            .products
            .values()
            .any(|p| p.id_typed() != id && p.sku().as_str() == sku)
        {
            return Err(StoreError::DuplicateSku(sku.to_string()));
        }
        match tables.products.get_mut(&id) {
            Some(slot) => {
                *slot = product.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("product {id}"))),
        }
    }

    fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let movements = tables.movement_count(id);
        if movements > 0 {
            return Err(StoreError::Referenced {
                product_id: id,
                movements,
            });
        }
        tables
            .products
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))
    }

    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.read()?.select_products(|_| true))
    }

    fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .products
            .values()
            .find(|p| p.sku().as_str() == sku)
            .cloned())
    }

    fn exists_by_sku(&self, sku: &str) -> Result<bool, StoreError> {
        let tables = self.read()?;
        Ok(tables.products.values().any(|p| p.sku().as_str() == sku))
    }

    fn find_by_category(&self, category: Category) -> Result<Vec<Product>, StoreError> {
        Ok(self.read()?.select_products(|p| p.category() == category))
    }

    fn find_low_stock(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.read()?.select_products(Product::is_low_stock))
    }

    fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Product>, StoreError> {
        let needle = needle.to_lowercase();
        Ok(self
            .read()?
            .select_products(|p| p.name().to_lowercase().contains(&needle)))
    }
}

impl MovementStore for InMemoryStockStore {
    fn insert_movement(&self, movement: StockMovement) -> Result<StockMovement, StoreError> {
        let mut tables = self.write()?;
        if !tables.products.contains_key(&movement.product_id()) {
            return Err(StoreError::UnknownProduct(movement.product_id()));
        }
        tables
            .movements
            .insert(movement.id_typed(), movement.clone());
        Ok(movement)
    }

    fn get_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        Ok(self.read()?.movements.get(&id).cloned())
    }

    fn list_movements(&self) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.read()?.select_movements(|_| true))
    }

    fn count_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError> {
        Ok(self.read()?.movement_count(product_id))
    }

    fn delete_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError> {
        let mut tables = self.write()?;
        let before = tables.movements.len();
        tables.movements.retain(|_, m| m.product_id() != product_id);
        Ok(before - tables.movements.len())
    }

    fn find_by_product(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .read()?
            .select_movements(|m| m.product_id() == product_id))
    }

    fn find_by_kind(&self, kind: MovementKind) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.read()?.select_movements(|m| m.kind() == kind))
    }

    fn find_by_lot(&self, lot: &str) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.read()?.select_movements(|m| m.lot() == Some(lot)))
    }

    fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .read()?
            .select_movements(|m| (start..=end).contains(&m.moved_at())))
    }

    fn find_near_expiry(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .read()?
            .select_by_expiry(|expiry| (start..=end).contains(&expiry)))
    }

    fn find_expired_at(&self, today: NaiveDate) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.read()?.select_by_expiry(|expiry| expiry < today))
    }

    fn find_by_product_and_period(
        &self,
        product_id: ProductId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.read()?.select_movements(|m| {
            m.product_id() == product_id && (start..=end).contains(&m.moved_at())
        }))
    }
}
