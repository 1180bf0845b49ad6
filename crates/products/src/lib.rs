//! Products domain module.
//!
//! The product master record and the rules for creating and editing it,
//! implemented as deterministic domain logic (no IO, no storage).

pub mod category;
pub mod product;
pub mod sku;

pub use category::Category;
pub use product::{
    MAX_NAME_LEN, NewProduct, Product, ProductChanges, ProductId, ProductSnapshot,
};
pub use sku::{MAX_SKU_LEN, Sku};
