//! # Product Repository
//!
//! Database operations for products.
//!
//! ## Stock Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Receipt accepted 28 units of BRK-1                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UPDATE products SET stock_quantity = stock_quantity + 28               │
//! │       │            (delta, never an absolute write)                     │
//! │       ▼                                                                 │
//! │  INSERT INTO stock_movements (product, +28, receiving event)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Delta updates mean two receipts committed back to back both land, even
//! when each read an older stock level.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use keystone_core::{Money, Product, StockMovement};

use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    sku: String,
    name: String,
    unit_price_cents: i64,
    stock_quantity: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            sku: row.sku,
            name: row.name,
            unit_price: Money::from_cents(row.unit_price_cents),
            stock_quantity: row.stock_quantity,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

const SELECT_PRODUCT: &str = "SELECT id, sku, name, unit_price_cents, stock_quantity, is_active, \
     created_at, updated_at, version FROM products";

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let mut conn = pool.acquire().await?;
/// let product = ProductRepository::new(&mut conn).find_by_sku("BRK-1").await?;
/// ```
pub struct ProductRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ProductRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ProductRepository { conn }
    }

    pub async fn insert(&mut self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        let result = sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, unit_price_cents, stock_quantity, is_active,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.unit_price.cents())
        .bind(product.stock_quantity)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .bind(product.version)
        .execute(&mut *self.conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match DbError::from(err) {
                DbError::UniqueViolation { .. } => Err(DbError::duplicate("sku", &product.sku)),
                other => Err(other),
            },
        }
    }

    pub async fn find(&mut self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("{SELECT_PRODUCT} WHERE id = ?");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(Product::from))
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Product> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    pub async fn find_by_sku(&mut self, sku: &str) -> DbResult<Option<Product>> {
        let sql = format!("{SELECT_PRODUCT} WHERE sku = ?");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(sku)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(Product::from))
    }

    /// Counts all products (for diagnostics).
    pub async fn count(&mut self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    /// Applies one stock movement as a delta and records it.
    pub async fn apply_movement(
        &mut self,
        movement: &StockMovement,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(
            product_id = %movement.product_id,
            delta = movement.quantity,
            "Adjusting stock"
        );

        let result = sqlx::query(
            r#"
            UPDATE products SET
                stock_quantity = stock_quantity + ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ?
            "#,
        )
        .bind(movement.quantity)
        .bind(now)
        .bind(&movement.product_id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", &movement.product_id));
        }

        sqlx::query(
            r#"
            INSERT INTO stock_movements (product_id, quantity, receiving_event_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&movement.product_id)
        .bind(movement.quantity)
        .bind(&movement.receiving_event_id)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }
}
