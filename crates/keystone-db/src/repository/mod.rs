//! # Repository Module
//!
//! Database repository implementations for Keystone.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  BackOffice operation                                                  │
//! │       │                                                                 │
//! │       │  let mut tx = db.begin_write().await?;                         │
//! │       │  OrderRepository::new(&mut tx).get(id)                         │
//! │       ▼                                                                 │
//! │  OrderRepository<'c>  (borrows one connection)                         │
//! │  ├── insert(&order)                                                    │
//! │  ├── get(id) / find_by_number(number)                                  │
//! │  └── update(&mut order)  ← WHERE id = ? AND version = ?                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Repositories borrow a connection instead of owning the pool, so      │
//! │  every read and write inside one operation share its transaction.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`CustomerRepository`], [`SupplierRepository`], [`ProductRepository`]
//! - [`OrderRepository`], [`QuoteRepository`], [`InvoiceRepository`],
//!   [`PurchaseOrderRepository`]
//! - [`SequenceRepository`] - document numbering
//! - [`EventRepository`] - status-change outbox writes

pub mod customer;
pub mod event;
pub mod invoice;
pub mod order;
pub mod product;
pub mod purchase_order;
pub mod quote;
pub mod sequence;
pub mod supplier;

pub use customer::CustomerRepository;
pub use event::EventRepository;
pub use invoice::InvoiceRepository;
pub use order::OrderRepository;
pub use product::ProductRepository;
pub use purchase_order::PurchaseOrderRepository;
pub use quote::QuoteRepository;
pub use sequence::SequenceRepository;
pub use supplier::SupplierRepository;

use keystone_core::{LineItem, Money};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::error;

use crate::error::{DbError, DbResult};

// =============================================================================
// JSON Columns
// =============================================================================

pub(crate) fn to_json<T: Serialize>(column: &str, value: Option<&T>) -> DbResult<Option<String>> {
    value
        .map(|v| serde_json::to_string(v).map_err(|e| DbError::decode(column, e)))
        .transpose()
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &str, raw: Option<String>) -> DbResult<Option<T>> {
    raw.map(|s| serde_json::from_str(&s).map_err(|e| DbError::decode(column, e)))
        .transpose()
}

/// Logs a failed stored-data check and converts it.
pub(crate) fn invariant(violation: keystone_core::InvariantViolation) -> DbError {
    error!(%violation, "Stored document failed verification");
    DbError::Invariant(violation)
}

// =============================================================================
// Line Items
// =============================================================================

/// The per-document line tables. Purchase order lines live in their own
/// repository because they also track received quantities.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LineTable {
    Order,
    Quote,
    Invoice,
}

impl LineTable {
    fn table(self) -> &'static str {
        match self {
            LineTable::Order => "order_line_items",
            LineTable::Quote => "quote_line_items",
            LineTable::Invoice => "invoice_line_items",
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            LineTable::Order => "order_id",
            LineTable::Quote => "quote_id",
            LineTable::Invoice => "invoice_id",
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LineRow {
    pub id: String,
    pub product_id: Option<String>,
    pub description: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

impl LineRow {
    /// Converts the row, checking the stored line total.
    pub(crate) fn into_line(self) -> DbResult<LineItem> {
        let stored = Money::from_cents(self.line_total_cents);
        let line = LineItem {
            id: self.id,
            product_id: self.product_id,
            description: self.description,
            sku: self.sku,
            quantity: self.quantity,
            unit_price: Money::from_cents(self.unit_price_cents),
        };
        line.verify_stored_total(stored).map_err(invariant)?;
        Ok(line)
    }
}

pub(crate) async fn load_lines(
    conn: &mut SqliteConnection,
    table: LineTable,
    parent_id: &str,
) -> DbResult<Vec<LineItem>> {
    let sql = format!(
        "SELECT id, product_id, description, sku, quantity, unit_price_cents, line_total_cents \
         FROM {} WHERE {} = ? ORDER BY position",
        table.table(),
        table.parent_column()
    );
    let rows: Vec<LineRow> = sqlx::query_as(&sql).bind(parent_id).fetch_all(conn).await?;
    rows.into_iter().map(LineRow::into_line).collect()
}

/// Deletes and re-inserts every line of a document.
pub(crate) async fn replace_lines(
    conn: &mut SqliteConnection,
    table: LineTable,
    parent_id: &str,
    lines: &[LineItem],
) -> DbResult<()> {
    let delete = format!("DELETE FROM {} WHERE {} = ?", table.table(), table.parent_column());
    sqlx::query(&delete).bind(parent_id).execute(&mut *conn).await?;

    let insert = format!(
        "INSERT INTO {} (id, {}, position, product_id, description, sku, quantity, \
         unit_price_cents, line_total_cents) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        table.table(),
        table.parent_column()
    );
    for (position, line) in lines.iter().enumerate() {
        sqlx::query(&insert)
            .bind(&line.id)
            .bind(parent_id)
            .bind(position as i64)
            .bind(&line.product_id)
            .bind(&line.description)
            .bind(&line.sku)
            .bind(line.quantity)
            .bind(line.unit_price.cents())
            .bind(line.line_total().cents())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
