//! Configuration loading and representation.
//!
//! Read from the process environment, the same way the rest of the deployment
//! is configured:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `USE_PERSISTENT_STORES` | `false` | use Postgres instead of the in-memory store |
//! | `DATABASE_URL` | none | required when persistent stores are enabled |
//! | `DATABASE_MAX_CONNECTIONS` | `5` | pool size for the Postgres store |
//! | `STOCK_NEAR_EXPIRY_DAYS` | `7` | near-expiry window used by reports, at most 3650 |
//! | `STOCK_DELETE_POLICY` | `cascade` | `cascade` or `restrict` |

use core::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reports::InventoryReports;
use crate::service::{DeletePolicy, StockService};
use crate::store::{
    InMemoryStockStore, MovementStore, PostgresStockStore, ProductStore, SharedStockStore,
};

pub const DEFAULT_NEAR_EXPIRY_DAYS: u32 = 7;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const MAX_NEAR_EXPIRY_DAYS: u32 = 3650;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),

    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which store backend the service runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockConfig {
    pub backend: StoreBackend,
    pub near_expiry_days: u32,
    pub delete_policy: DeletePolicy,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::InMemory,
            near_expiry_days: DEFAULT_NEAR_EXPIRY_DAYS,
            delete_policy: DeletePolicy::Cascade,
        }
    }
}

impl StockConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup (tests pass a map instead of the process env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let persistent = match lookup("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool("USE_PERSISTENT_STORES", &raw)?,
            None => false,
        };

        let backend = if persistent {
            let database_url = lookup("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let max_connections =
                parse_or("DATABASE_MAX_CONNECTIONS", lookup("DATABASE_MAX_CONNECTIONS"), DEFAULT_MAX_CONNECTIONS)?;
            if max_connections == 0 {
                return Err(invalid("DATABASE_MAX_CONNECTIONS", "0", "must be at least 1"));
            }
            StoreBackend::Postgres {
                database_url,
                max_connections,
            }
        } else {
            StoreBackend::InMemory
        };

        let near_expiry_days = parse_or(
            "STOCK_NEAR_EXPIRY_DAYS",
            lookup("STOCK_NEAR_EXPIRY_DAYS"),
            DEFAULT_NEAR_EXPIRY_DAYS,
        )?;
        if near_expiry_days > MAX_NEAR_EXPIRY_DAYS {
            return Err(invalid(
                "STOCK_NEAR_EXPIRY_DAYS",
                &near_expiry_days.to_string(),
                format!("must be at most {MAX_NEAR_EXPIRY_DAYS}"),
            ));
        }

        let delete_policy = parse_or(
            "STOCK_DELETE_POLICY",
            lookup("STOCK_DELETE_POLICY"),
            DeletePolicy::Cascade,
        )?;

        Ok(Self {
            backend,
            near_expiry_days,
            delete_policy,
        })
    }

    /// Open the configured backend. Postgres stores are connected and migrated.
    pub async fn connect_store(&self) -> anyhow::Result<SharedStockStore> {
        match &self.backend {
            StoreBackend::InMemory => {
                tracing::info!("using in-memory stock store");
                Ok(Arc::new(InMemoryStockStore::new()))
            }
            StoreBackend::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStockStore::connect(database_url, *max_connections).await?;
                store.migrate().await?;
                tracing::info!(max_connections = *max_connections, "using Postgres stock store");
                Ok(Arc::new(store))
            }
        }
    }

    /// A [`StockService`] over `store` using the configured delete policy.
    pub fn service<S>(&self, store: S) -> StockService<S>
    where
        S: ProductStore + MovementStore,
    {
        StockService::new(store).with_delete_policy(self.delete_policy)
    }

    /// [`InventoryReports`] over `store` using the configured near-expiry window.
    pub fn reports<S>(&self, store: S) -> InventoryReports<S>
    where
        S: ProductStore + MovementStore,
    {
        InventoryReports::new(store).with_near_expiry_days(self.near_expiry_days)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(invalid(key, raw, "expected true or false")),
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, e.to_string())),
    }
}
