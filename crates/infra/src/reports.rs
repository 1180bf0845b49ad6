//! Read-only inventory reports: stock value, low stock and expiry alerts.

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

use stockroom_core::ValueObject;
use stockroom_inventory::{NEAR_EXPIRY_DAYS, StockMovement};
use stockroom_products::{Product, ProductId};

use crate::store::{MovementStore, ProductStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub current_quantity: i64,
    pub minimum_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiryAlert {
    pub product_id: ProductId,
    /// `None` when the product row is gone.
    pub product_name: Option<String>,
    pub lot: Option<String>,
    pub expiry: NaiveDate,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub as_of: NaiveDate,
    pub total_stock_value: Decimal,
    pub total_products: usize,
    pub low_stock_count: usize,
    pub near_expiry_count: usize,
    pub expired_count: usize,
    pub low_stock: Vec<LowStockAlert>,
    pub near_expiry: Vec<ExpiryAlert>,
    pub expired: Vec<ExpiryAlert>,
}

#[derive(Debug, Clone)]
pub struct InventoryReports<S> {
    store: S,
    near_expiry_days: u32,
}

impl<S> InventoryReports<S>
where
    S: ProductStore + MovementStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            near_expiry_days: NEAR_EXPIRY_DAYS as u32,
        }
    }

    pub fn with_near_expiry_days(mut self, days: u32) -> Self {
        self.near_expiry_days = days;
        self
    }

    pub fn near_expiry_days(&self) -> u32 {
        self.near_expiry_days
    }

    /// Σ current_quantity × unit_price over every product.
    pub fn total_stock_value(&self) -> Result<Decimal, StoreError> {
        Ok(self
            .store
            .list_products()?
            .iter()
            .map(Product::stock_value)
            .sum())
    }

    /// Movements whose expiry falls in `[today, today + days]`.
    ///
    /// A window reaching past the last representable date ends at `NaiveDate::MAX`.
    pub fn near_expiry(&self, days: u32, today: NaiveDate) -> Result<Vec<StockMovement>, StoreError> {
        let end = today
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        self.store.find_near_expiry(today, end)
    }

    pub fn low_stock(&self) -> Result<Vec<Product>, StoreError> {
        self.store.find_low_stock()
    }

    pub fn expired(&self, today: NaiveDate) -> Result<Vec<StockMovement>, StoreError> {
        self.store.find_expired_at(today)
    }

    #[tracing::instrument(skip(self), err)]
    pub fn dashboard(&self, today: NaiveDate) -> Result<Dashboard, StoreError> {
        let products = self.store.list_products()?;
        let names: HashMap<ProductId, &str> = products
            .iter()
            .map(|p| (p.id_typed(), p.name()))
            .collect();

        let low_stock: Vec<LowStockAlert> = products
            .iter()
            .filter(|p| p.is_low_stock())
            .map(|p| LowStockAlert {
                product_id: p.id_typed(),
                sku: p.sku().as_str().to_string(),
                name: p.name().to_string(),
                current_quantity: p.current_quantity(),
                minimum_quantity: p.minimum_quantity(),
            })
            .collect();

        let expiry_alert = |m: &StockMovement| {
            m.expiry().map(|expiry| ExpiryAlert {
                product_id: m.product_id(),
                product_name: names.get(&m.product_id()).map(|n| n.to_string()),
                lot: m.lot().map(str::to_string),
                expiry,
                quantity: m.quantity(),
            })
        };
        let near_expiry: Vec<ExpiryAlert> = self
            .near_expiry(self.near_expiry_days, today)?
            .iter()
            .filter_map(expiry_alert)
            .collect();
        let expired: Vec<ExpiryAlert> = self
            .expired(today)?
            .iter()
            .filter_map(expiry_alert)
            .collect();

        Ok(Dashboard {
            as_of: today,
            total_stock_value: products.iter().map(Product::stock_value).sum(),
            total_products: products.len(),
            low_stock_count: low_stock.len(),
            near_expiry_count: near_expiry.len(),
            expired_count: expired.len(),
            low_stock,
            near_expiry,
            expired,
        })
    }
}
