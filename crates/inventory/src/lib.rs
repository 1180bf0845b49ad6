//! Inventory domain module.
//!
//! Stock movements (inbound/outbound events against one product) and the rules
//! a movement must satisfy before it may be applied, implemented purely as
//! deterministic domain logic (no IO, no storage).

pub mod error;
pub mod movement;

pub use error::MovementError;
pub use movement::{
    MAX_LOT_LEN, MAX_NOTE_LEN, MovementId, MovementKind, NEAR_EXPIRY_DAYS, StockMovement,
};
