use chrono::NaiveDate;
use thiserror::Error;

use stockroom_core::DomainError;
use stockroom_products::ProductId;

/// Reasons a stock movement is rejected.
///
/// All of these are caller-input failures; none is retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MovementError {
    #[error("movement references product {expected} but was validated against {actual}")]
    ProductMismatch {
        expected: ProductId,
        actual: ProductId,
    },

    #[error("quantity must be greater than zero (got {quantity:?})")]
    InvalidQuantity { quantity: Option<i64> },

    #[error("lot is required for perishable products")]
    MissingLot,

    #[error("expiry date is required for perishable products")]
    MissingExpiry,

    #[error("expiry date {expiry} is before today ({today})")]
    ExpiredOnEntry { expiry: NaiveDate, today: NaiveDate },

    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("receiving {quantity} on top of {current} exceeds the representable stock level")]
    QuantityOverflow { current: i64, quantity: i64 },

    #[error("{field} must be at most {max} characters (got {len})")]
    FieldTooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },
}

impl From<MovementError> for DomainError {
    fn from(err: MovementError) -> Self {
        match err {
            MovementError::InsufficientStock { .. }
            | MovementError::ProductMismatch { .. }
            | MovementError::QuantityOverflow { .. } => {
                DomainError::invariant(err.to_string())
            }
            _ => DomainError::validation(err.to_string()),
        }
    }
}
