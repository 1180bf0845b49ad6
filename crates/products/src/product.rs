use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, Entity, typed_id};

use crate::category::Category;
use crate::sku::Sku;

pub const MAX_NAME_LEN: usize = 200;

/// Prices are kept at cents precision.
const PRICE_SCALE: u32 = 2;

typed_id!(
    /// Product identifier, assigned when the product is created.
    ProductId
);

/// Command: register a new product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub category: Category,
    pub unit_price: Decimal,
    pub minimum_quantity: i64,
}

/// Command: edit the descriptive fields of an existing product.
///
/// SKU, current quantity and creation time are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductChanges {
    pub name: String,
    pub category: Category,
    pub unit_price: Decimal,
    pub minimum_quantity: i64,
}

/// Persisted column set of a product, used by store backends to rebuild it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub sku: Sku,
    pub name: String,
    pub category: Category,
    pub unit_price: Decimal,
    pub minimum_quantity: i64,
    pub current_quantity: i64,
    pub created_at: DateTime<Utc>,
}

/// Master record for a stocked item.
///
/// `current_quantity` starts at zero and only moves through [`Product::add_stock`]
/// and [`Product::remove_stock`], which the stock service calls after a movement
/// has been validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    id: ProductId,
    sku: Sku,
    name: String,
    category: Category,
    unit_price: Decimal,
    minimum_quantity: i64,
    current_quantity: i64,
    created_at: DateTime<Utc>,
}

impl Product {
    /// Validate a registration command and build the product with zero stock.
    pub fn create(cmd: NewProduct, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let sku = Sku::parse(&cmd.sku)?;
        let name = validate_name(&cmd.name)?;
        let unit_price = validate_price(cmd.unit_price)?;
        validate_minimum(cmd.minimum_quantity)?;

        Ok(Self {
            id: ProductId::new(),
            sku,
            name,
            category: cmd.category,
            unit_price,
            minimum_quantity: cmd.minimum_quantity,
            current_quantity: 0,
            created_at,
        })
    }

    /// Rebuild a product from persisted state. No validation is performed.
    pub fn restore(snapshot: ProductSnapshot) -> Self {
        Self {
            id: snapshot.id,
            sku: snapshot.sku,
            name: snapshot.name,
            category: snapshot.category,
            unit_price: snapshot.unit_price,
            minimum_quantity: snapshot.minimum_quantity,
            current_quantity: snapshot.current_quantity,
            created_at: snapshot.created_at,
        }
    }

    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            id: self.id,
            sku: self.sku.clone(),
            name: self.name.clone(),
            category: self.category,
            unit_price: self.unit_price,
            minimum_quantity: self.minimum_quantity,
            current_quantity: self.current_quantity,
            created_at: self.created_at,
        }
    }

    /// Apply an edit. All checks run before any field changes.
    pub fn apply_changes(&mut self, changes: ProductChanges) -> DomainResult<()> {
        let name = validate_name(&changes.name)?;
        let unit_price = validate_price(changes.unit_price)?;
        validate_minimum(changes.minimum_quantity)?;

        self.name = name;
        self.category = changes.category;
        self.unit_price = unit_price;
        self.minimum_quantity = changes.minimum_quantity;
        Ok(())
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn minimum_quantity(&self) -> i64 {
        self.minimum_quantity
    }

    pub fn current_quantity(&self) -> i64 {
        self.current_quantity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Value of the stock on hand (`current_quantity × unit_price`).
    pub fn stock_value(&self) -> Decimal {
        Decimal::from(self.current_quantity) * self.unit_price
    }

    /// Low-stock alert: strictly below the configured minimum.
    pub fn is_low_stock(&self) -> bool {
        self.current_quantity < self.minimum_quantity
    }

    pub fn is_perishable(&self) -> bool {
        self.category == Category::Perishable
    }

    /// Increase stock on hand. The caller passes a non-negative amount.
    pub fn add_stock(&mut self, amount: i64) {
        self.current_quantity += amount;
    }

    /// Decrease stock on hand.
    ///
    /// Sufficiency is checked by movement validation, not here: removing more
    /// than is on hand leaves a negative quantity.
    pub fn remove_stock(&mut self, amount: i64) {
        self.current_quantity -= amount;
    }

    pub fn has_sufficient_stock(&self, amount: i64) -> bool {
        self.current_quantity >= amount
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    DomainError::check_text("name", name, MAX_NAME_LEN)?;
    Ok(name.to_string())
}

fn validate_price(price: Decimal) -> DomainResult<Decimal> {
    let price = price.round_dp(PRICE_SCALE);
    if price <= Decimal::ZERO {
        return Err(DomainError::validation("unit price must be greater than zero"));
    }
    Ok(price)
}

fn validate_minimum(minimum: i64) -> DomainResult<()> {
    if minimum < 0 {
        return Err(DomainError::validation("minimum quantity cannot be negative"));
    }
    Ok(())
}
