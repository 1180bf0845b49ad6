//! Postgres-backed product/movement store.
//!
//! ## Sync over async
//!
//! The store traits are synchronous. Each call blocks on the ambient tokio
//! runtime via `block_in_place`, so callers must run inside a **multi-thread**
//! runtime; outside any runtime calls fail with [`StoreError::Backend`].
//!
//! ## Error mapping
//!
//! | PostgreSQL error code | Operation | StoreError |
//! |---|---|---|
//! | `23505` unique violation | product insert/update | `DuplicateSku` |
//! | `23503` foreign key violation | movement insert | `UnknownProduct` |
//! | `23503` foreign key violation | product delete | `Referenced` |
//! | anything else | any | `Backend` |

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use stockroom_core::ValueObject;
use stockroom_inventory::{MovementId, MovementKind, StockMovement};
use stockroom_products::{Category, Product, ProductId, ProductSnapshot, Sku};

use super::{MovementStore, ProductStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id               UUID PRIMARY KEY,
        sku              VARCHAR(50)   NOT NULL,
        name             VARCHAR(200)  NOT NULL,
        category         TEXT          NOT NULL,
        unit_price       NUMERIC(10,2) NOT NULL CHECK (unit_price > 0),
        minimum_quantity BIGINT        NOT NULL CHECK (minimum_quantity >= 0),
        current_quantity BIGINT        NOT NULL DEFAULT 0,
        created_at       TIMESTAMPTZ   NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS products_sku_key ON products (sku)",
    r#"
    CREATE TABLE IF NOT EXISTS stock_movements (
        id         UUID PRIMARY KEY,
        product_id UUID        NOT NULL REFERENCES products (id) ON DELETE RESTRICT,
        kind       TEXT        NOT NULL,
        quantity   BIGINT      NOT NULL CHECK (quantity >= 1),
        moved_at   TIMESTAMPTZ NOT NULL,
        lot        VARCHAR(100),
        expiry     DATE,
        note       VARCHAR(500)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS stock_movements_product_idx ON stock_movements (product_id, moved_at DESC)",
    "CREATE INDEX IF NOT EXISTS stock_movements_moved_at_idx ON stock_movements (moved_at DESC)",
    "CREATE INDEX IF NOT EXISTS stock_movements_lot_idx ON stock_movements (lot)",
    "CREATE INDEX IF NOT EXISTS stock_movements_expiry_idx ON stock_movements (expiry) WHERE expiry IS NOT NULL",
];

const PRODUCT_COLUMNS: &str =
    "id, sku, name, category, unit_price, minimum_quantity, current_quantity, created_at";

const MOVEMENT_COLUMNS: &str = "id, product_id, kind, quantity, moved_at, lot, expiry, note";

/// Postgres-backed store implementing both [`ProductStore`] and [`MovementStore`].
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres for the stock store")?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .with_context(|| format!("failed to apply schema statement: {}", statement.trim()))?;
        }
        tracing::info!(statements = SCHEMA.len(), "stock store schema ready");
        Ok(())
    }

    fn block<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Backend(format!(
                "{operation}: PostgresStockStore requires a tokio runtime"
            ))
        })?;
        let span = tracing::debug_span!("postgres_stock_store", operation);
        let _entered = span.enter();
        tokio::task::block_in_place(|| handle.block_on(fut))
    }

    async fn fetch_products(
        &self,
        operation: &'static str,
        sql: &str,
        bind: Option<&str>,
    ) -> Result<Vec<Product>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(product_from_row).collect()
    }

    async fn fetch_movements<'q>(
        &self,
        operation: &'static str,
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(movement_from_row).collect()
    }
}

impl ProductStore for PostgresStockStore {
    fn insert_product(&self, product: Product) -> Result<Product, StoreError> {
        self.block("insert_product", async {
            sqlx::query(
                r#"
                INSERT INTO products (
                    id, sku, name, category, unit_price,
                    minimum_quantity, current_quantity, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(*product.id_typed().as_uuid())
            .bind(product.sku().as_str())
            .bind(product.name())
            .bind(product.category().as_str())
            .bind(product.unit_price())
            .bind(product.minimum_quantity())
            .bind(product.current_quantity())
            .bind(product.created_at())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_product_write_error("insert_product", product.sku(), e))?;
            Ok(())
        })?;
        Ok(product)
    }

    fn update_product(&self, product: &Product) -> Result<(), StoreError> {
        self.block("update_product", async {
            let result = sqlx::query(
                r#"
                UPDATE products
                SET sku = $2,
                    name = $3,
                    category = $4,
                    unit_price = $5,
                    minimum_quantity = $6,
                    current_quantity = $7
                WHERE id = $1
                "#,
            )
            .bind(*product.id_typed().as_uuid())
            .bind(product.sku().as_str())
            .bind(product.name())
            .bind(product.category().as_str())
            .bind(product.unit_price())
            .bind(product.minimum_quantity())
            .bind(product.current_quantity())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_product_write_error("update_product", product.sku(), e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("product {}", product.id_typed())));
            }
            Ok(())
        })
    }

    fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
        self.block("delete_product", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;

            let movements: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE product_id = $1")
                    .bind(id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("delete_product", e))?;
            if movements > 0 {
                return Err(StoreError::Referenced {
                    product_id: id,
                    movements: usize::try_from(movements).unwrap_or(usize::MAX),
                });
            }

            let result = sqlx::query("DELETE FROM products WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if foreign_key_violation(&e) {
                        StoreError::Referenced {
                            product_id: id,
                            movements: 1,
                        }
                    } else {
                        map_sqlx_error("delete_product", e)
                    }
                })?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("product {id}")));
            }

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit", e))
        })
    }

    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.block("get_product", async {
            let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("get_product", e))?;
            row.as_ref().map(product_from_row).transpose()
        })
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at, id");
        self.block("list_products", self.fetch_products("list_products", &sql, None))
    }

    fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1");
        let mut found = self.block("find_by_sku", self.fetch_products("find_by_sku", &sql, Some(sku)))?;
        Ok(found.pop())
    }

    fn exists_by_sku(&self, sku: &str) -> Result<bool, StoreError> {
        self.block("exists_by_sku", async {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM products WHERE sku = $1)")
                .bind(sku)
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("exists_by_sku", e))
        })
    }

    fn find_by_category(&self, category: Category) -> Result<Vec<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE category = $1 ORDER BY created_at, id"
        );
        self.block(
            "find_by_category",
            self.fetch_products("find_by_category", &sql, Some(category.as_str())),
        )
    }

    fn find_low_stock(&self) -> Result<Vec<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE current_quantity < minimum_quantity ORDER BY created_at, id"
        );
        self.block("find_low_stock", self.fetch_products("find_low_stock", &sql, None))
    }

    fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Product>, StoreError> {
        // strpos avoids LIKE wildcard escaping for user-supplied needles.
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE strpos(lower(name), lower($1)) > 0 ORDER BY created_at, id"
        );
        self.block(
            "find_by_name_contains",
            self.fetch_products("find_by_name_contains", &sql, Some(needle)),
        )
    }
}

impl MovementStore for PostgresStockStore {
    fn insert_movement(&self, movement: StockMovement) -> Result<StockMovement, StoreError> {
        self.block("insert_movement", async {
            sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    id, product_id, kind, quantity, moved_at, lot, expiry, note
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(*movement.id_typed().as_uuid())
            .bind(*movement.product_id().as_uuid())
            .bind(movement.kind().as_str())
            .bind(movement.quantity())
            .bind(movement.moved_at())
            .bind(movement.lot())
            .bind(movement.expiry())
            .bind(movement.note())
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if foreign_key_violation(&e) {
                    StoreError::UnknownProduct(movement.product_id())
                } else {
                    map_sqlx_error("insert_movement", e)
                }
            })?;
            Ok(())
        })?;
        Ok(movement)
    }

    fn get_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        self.block("get_movement", async {
            let row = sqlx::query(&format!(
                "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_movement", e))?;
            row.as_ref().map(movement_from_row).transpose()
        })
    }

    fn list_movements(&self) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements ORDER BY moved_at DESC, id DESC");
        self.block("list_movements", self.fetch_movements("list_movements", sqlx::query(&sql)))
    }

    fn count_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError> {
        self.block("count_movements_of", async {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE product_id = $1")
                    .bind(product_id.as_uuid())
                    .fetch_one(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("count_movements_of", e))?;
            Ok(usize::try_from(count).unwrap_or(usize::MAX))
        })
    }

    fn delete_movements_of(&self, product_id: ProductId) -> Result<usize, StoreError> {
        self.block("delete_movements_of", async {
            let result = sqlx::query("DELETE FROM stock_movements WHERE product_id = $1")
                .bind(product_id.as_uuid())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_movements_of", e))?;
            Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
        })
    }

    fn find_by_product(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE product_id = $1 ORDER BY moved_at DESC, id DESC"
        );
        let query = sqlx::query(&sql).bind(*product_id.as_uuid());
        self.block("find_by_product", self.fetch_movements("find_by_product", query))
    }

    fn find_by_kind(&self, kind: MovementKind) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE kind = $1 ORDER BY moved_at DESC, id DESC"
        );
        let query = sqlx::query(&sql).bind(kind.as_str());
        self.block("find_by_kind", self.fetch_movements("find_by_kind", query))
    }

    fn find_by_lot(&self, lot: &str) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE lot = $1");
        let query = sqlx::query(&sql).bind(lot);
        self.block("find_by_lot", self.fetch_movements("find_by_lot", query))
    }

    fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE moved_at BETWEEN $1 AND $2 ORDER BY moved_at DESC, id DESC"
        );
        let query = sqlx::query(&sql).bind(start).bind(end);
        self.block("find_by_date_range", self.fetch_movements("find_by_date_range", query))
    }

    fn find_near_expiry(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE expiry IS NOT NULL AND expiry BETWEEN $1 AND $2 ORDER BY expiry ASC, id"
        );
        let query = sqlx::query(&sql).bind(start).bind(end);
        self.block("find_near_expiry", self.fetch_movements("find_near_expiry", query))
    }

    fn find_expired_at(&self, today: NaiveDate) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE expiry IS NOT NULL AND expiry < $1 ORDER BY expiry ASC, id"
        );
        let query = sqlx::query(&sql).bind(today);
        self.block("find_expired_at", self.fetch_movements("find_expired_at", query))
    }

    fn find_by_product_and_period(
        &self,
        product_id: ProductId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE product_id = $1 AND moved_at BETWEEN $2 AND $3 \
             ORDER BY moved_at DESC, id DESC"
        );
        let query = sqlx::query(&sql)
            .bind(*product_id.as_uuid())
            .bind(start)
            .bind(end);
        self.block(
            "find_by_product_and_period",
            self.fetch_movements("find_by_product_and_period", query),
        )
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let sku: String = column(row, "sku")?;
    let category: String = column(row, "category")?;

    Ok(Product::restore(ProductSnapshot {
        id: ProductId::from_uuid(column::<Uuid>(row, "id")?),
        sku: Sku::parse(&sku).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        name: column(row, "name")?,
        category: category
            .parse::<Category>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        unit_price: column::<Decimal>(row, "unit_price")?,
        minimum_quantity: column(row, "minimum_quantity")?,
        current_quantity: column(row, "current_quantity")?,
        created_at: column(row, "created_at")?,
    }))
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let kind: String = column(row, "kind")?;

    Ok(StockMovement::restore(
        MovementId::from_uuid(column::<Uuid>(row, "id")?),
        ProductId::from_uuid(column::<Uuid>(row, "product_id")?),
        kind.parse::<MovementKind>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        column(row, "quantity")?,
        column(row, "moved_at")?,
        column(row, "lot")?,
        column(row, "expiry")?,
        column(row, "note")?,
    ))
}

/// Integrity violations the store translates into typed errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Violation {
    UniqueKey,
    ForeignKey,
}

impl Violation {
    fn from_sqlstate(code: &str) -> Option<Self> {
        match code {
            "23505" => Some(Self::UniqueKey),
            "23503" => Some(Self::ForeignKey),
            _ => None,
        }
    }
}

fn violation(err: &sqlx::Error) -> Option<Violation> {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .as_deref()
            .and_then(Violation::from_sqlstate),
        _ => None,
    }
}

fn foreign_key_violation(err: &sqlx::Error) -> bool {
    violation(err) == Some(Violation::ForeignKey)
}

fn map_product_write_error(operation: &str, sku: &Sku, err: sqlx::Error) -> StoreError {
    match violation(&err) {
        Some(Violation::UniqueKey) => StoreError::DuplicateSku(sku.as_str().to_string()),
        _ => map_sqlx_error(operation, err),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Backend(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
