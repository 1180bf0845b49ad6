use core::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, Entity, typed_id};
use stockroom_products::{Product, ProductId};

use crate::error::MovementError;

pub const MAX_LOT_LEN: usize = 100;
pub const MAX_NOTE_LEN: usize = 500;

/// Window (in days, inclusive) for the near-expiry alert.
pub const NEAR_EXPIRY_DAYS: u64 = 7;

typed_id!(
    /// Stock movement identifier.
    MovementId
);

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Inbound,
    Outbound,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Inbound => "INBOUND",
            MovementKind::Outbound => "OUTBOUND",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INBOUND" => Ok(MovementKind::Inbound),
            "OUTBOUND" => Ok(MovementKind::Outbound),
            other => Err(DomainError::validation(format!(
                "unknown movement type '{other}' (expected INBOUND or OUTBOUND)"
            ))),
        }
    }
}

/// A single inbound/outbound stock event against one product.
///
/// The movement only carries the product's id. Validation takes the product
/// explicitly, loaded by the caller through the product store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    id: MovementId,
    product_id: ProductId,
    kind: MovementKind,
    quantity: i64,
    moved_at: DateTime<Utc>,
    lot: Option<String>,
    expiry: Option<NaiveDate>,
    note: Option<String>,
}

impl StockMovement {
    /// Start a movement stamped with `moved_at`. The timestamp never changes afterwards.
    pub fn new(
        product_id: ProductId,
        kind: MovementKind,
        quantity: i64,
        moved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            product_id,
            kind,
            quantity,
            moved_at,
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

    /// Rebuild a persisted movement.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: MovementId,
        product_id: ProductId,
        kind: MovementKind,
        quantity: i64,
        moved_at: DateTime<Utc>,
        lot: Option<String>,
        expiry: Option<NaiveDate>,
        note: Option<String>,
    ) -> Self {
        Self {
            id,
            product_id,
            kind,
            quantity,
            moved_at,
            lot,
            expiry,
            note,
        }
    }

    pub fn id_typed(&self) -> MovementId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn moved_at(&self) -> DateTime<Utc> {
        self.moved_at
    }

    pub fn lot(&self) -> Option<&str> {
        self.lot.as_deref()
    }

    pub fn expiry(&self) -> Option<NaiveDate> {
        self.expiry
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Length limits on the free-text columns (lot, note).
    pub fn check_fields(&self) -> Result<(), MovementError> {
        check_len("lot", self.lot.as_deref(), MAX_LOT_LEN)?;
        check_len("note", self.note.as_deref(), MAX_NOTE_LEN)
    }

    /// Validate against the referenced product using today's UTC date.
    pub fn validate(&self, product: &Product) -> Result<(), MovementError> {
        self.validate_at(product, Utc::now().date_naive())
    }

    /// Validate against the referenced product as of `today`.
    ///
    /// Rules run in order and the first failure is returned: quantity,
    /// perishable lot/expiry, stock sufficiency for outbound movements, then
    /// headroom for inbound ones (the resulting level must fit in an `i64`).
    /// Neither the movement nor the product is modified.
    pub fn validate_at(&self, product: &Product, today: NaiveDate) -> Result<(), MovementError> {
        if *product.id() != self.product_id {
            return Err(MovementError::ProductMismatch {
                expected: self.product_id,
                actual: *product.id(),
            });
        }

        if self.quantity <= 0 {
            return Err(MovementError::InvalidQuantity {
                quantity: Some(self.quantity),
            });
        }

        if product.is_perishable() {
            if !matches!(self.lot.as_deref(), Some(lot) if !lot.trim().is_empty()) {
                return Err(MovementError::MissingLot);
            }
            let expiry = self.expiry.ok_or(MovementError::MissingExpiry)?;
            if expiry < today {
                return Err(MovementError::ExpiredOnEntry { expiry, today });
            }
        }

        if self.kind == MovementKind::Outbound && !product.has_sufficient_stock(self.quantity) {
            return Err(MovementError::InsufficientStock {
                available: product.current_quantity(),
                requested: self.quantity,
            });
        }

        if self.kind == MovementKind::Inbound
            && product.current_quantity().checked_add(self.quantity).is_none()
        {
            return Err(MovementError::QuantityOverflow {
                current: product.current_quantity(),
                quantity: self.quantity,
            });
        }

        Ok(())
    }

    /// Apply this movement's delta to its product.
    ///
    /// Call only after [`StockMovement::validate_at`] succeeded.
    pub fn apply_to(&self, product: &mut Product) {
        match self.kind {
            MovementKind::Inbound => product.add_stock(self.quantity),
            MovementKind::Outbound => product.remove_stock(self.quantity),
        }
    }

    /// Undo [`StockMovement::apply_to`].
    pub fn revert_on(&self, product: &mut Product) {
        match self.kind {
            MovementKind::Inbound => product.remove_stock(self.quantity),
            MovementKind::Outbound => product.add_stock(self.quantity),
        }
    }

    pub fn is_near_expiry(&self) -> bool {
        self.is_near_expiry_at(Utc::now().date_naive())
    }

    /// Expiry falls on or before `today + NEAR_EXPIRY_DAYS`.
    pub fn is_near_expiry_at(&self, today: NaiveDate) -> bool {
        match (self.expiry, today.checked_add_days(Days::new(NEAR_EXPIRY_DAYS))) {
            (Some(expiry), Some(limit)) => expiry <= limit,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().date_naive())
    }

    pub fn is_expired_at(&self, today: NaiveDate) -> bool {
        self.expiry.is_some_and(|expiry| expiry < today)
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn check_len(field: &'static str, value: Option<&str>, max: usize) -> Result<(), MovementError> {
    let len = value.map_or(0, |v| v.chars().count());
    if len > max {
        return Err(MovementError::FieldTooLong { field, max, len });
    }
    Ok(())
}
