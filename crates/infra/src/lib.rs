//! Infrastructure layer: stores, the stock service, reports and configuration.

pub mod clock;
pub mod config;
pub mod reports;
pub mod service;
pub mod store;

mod integration_tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, MAX_NEAR_EXPIRY_DAYS, StockConfig, StoreBackend};
pub use reports::{Dashboard, ExpiryAlert, InventoryReports, LowStockAlert};
pub use service::{DeletePolicy, RecordMovement, ServiceError, ServiceResult, StockService};
pub use store::{
    InMemoryStockStore, MovementStore, PostgresStockStore, ProductStore, SharedStockStore,
    StockStore, StoreError,
};
