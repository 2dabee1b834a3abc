//! # Order Repository
//!
//! Orders and their line items.
//!
//! ## Optimistic Concurrency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  read order (version 3) ──► core mutates ──► UPDATE ... SET version = 4 │
//! │                                               WHERE id = ? AND          │
//! │                                                     version = 3         │
//! │                                                                         │
//! │  0 rows affected ──► someone else saved version 4 first                 │
//! │                  ──► ConcurrentModification, transaction rolls back     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use keystone_core::{
    Address, Money, Order, OrderStatus, PaymentMethod, PaymentStatus, Priority, ProofOfPayment,
    TaxRate, Totals,
};

use super::{from_json, invariant, load_lines, replace_lines, to_json, LineTable};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    customer_id: String,
    vat_rate_bps: i64,
    subtotal_cents: i64,
    vat_cents: i64,
    discount_cents: i64,
    total_cents: i64,
    status: OrderStatus,
    held_from: Option<OrderStatus>,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    proof_of_payment: Option<String>,
    delivery_address: Option<String>,
    priority: Priority,
    source_quote_id: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

const SELECT_ORDER: &str = "SELECT id, order_number, customer_id, vat_rate_bps, subtotal_cents, \
     vat_cents, discount_cents, total_cents, status, held_from, payment_method, payment_status, \
     proof_of_payment, delivery_address, priority, source_quote_id, notes, created_at, \
     updated_at, version FROM orders";

pub(crate) fn rate_from_row(column: &str, bps: i64) -> DbResult<TaxRate> {
    u32::try_from(bps)
        .map(TaxRate::from_bps)
        .map_err(|e| DbError::decode(column, e))
}

pub(crate) fn totals_from_row(subtotal: i64, vat: i64, discount: i64, total: i64) -> Totals {
    Totals {
        subtotal: Money::from_cents(subtotal),
        vat: Money::from_cents(vat),
        discount: Money::from_cents(discount),
        total: Money::from_cents(total),
    }
}

/// Repository for order database operations.
pub struct OrderRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> OrderRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        OrderRepository { conn }
    }

    pub async fn insert(&mut self, order: &Order) -> DbResult<()> {
        debug!(id = %order.id, number = %order.order_number, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, customer_id, vat_rate_bps,
                subtotal_cents, vat_cents, discount_cents, total_cents,
                status, held_from, payment_method, payment_status,
                proof_of_payment, delivery_address, priority, source_quote_id, notes,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.customer_id)
        .bind(i64::from(order.vat_rate.bps()))
        .bind(order.totals.subtotal.cents())
        .bind(order.totals.vat.cents())
        .bind(order.totals.discount.cents())
        .bind(order.totals.total.cents())
        .bind(order.status)
        .bind(order.held_from)
        .bind(order.payment_method)
        .bind(order.payment_status)
        .bind(to_json("proof_of_payment", order.proof_of_payment.as_ref())?)
        .bind(to_json("delivery_address", order.delivery_address.as_ref())?)
        .bind(order.priority)
        .bind(&order.source_quote_id)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.version)
        .execute(&mut *self.conn)
        .await?;

        replace_lines(&mut *self.conn, LineTable::Order, &order.id, &order.lines).await
    }

    pub async fn find(&mut self, id: &str) -> DbResult<Option<Order>> {
        let sql = format!("{SELECT_ORDER} WHERE id = ?");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Order> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))
    }

    pub async fn find_by_number(&mut self, number: &str) -> DbResult<Option<Order>> {
        let sql = format!("{SELECT_ORDER} WHERE order_number = ?");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(number)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// Orders created at or after `since`, oldest first.
    pub async fn list_created_since(&mut self, since: DateTime<Utc>) -> DbResult<Vec<Order>> {
        let sql = format!("{SELECT_ORDER} WHERE created_at >= ? ORDER BY created_at");
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(since)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    /// Saves every mutable column and the lines, then bumps `order.version`.
    pub async fn update(&mut self, order: &mut Order) -> DbResult<()> {
        debug!(
            id = %order.id,
            status = %order.status,
            version = order.version,
            "Updating order"
        );

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                subtotal_cents = ?,
                vat_cents = ?,
                discount_cents = ?,
                total_cents = ?,
                status = ?,
                held_from = ?,
                payment_method = ?,
                payment_status = ?,
                proof_of_payment = ?,
                delivery_address = ?,
                priority = ?,
                notes = ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(order.totals.subtotal.cents())
        .bind(order.totals.vat.cents())
        .bind(order.totals.discount.cents())
        .bind(order.totals.total.cents())
        .bind(order.status)
        .bind(order.held_from)
        .bind(order.payment_method)
        .bind(order.payment_status)
        .bind(to_json("proof_of_payment", order.proof_of_payment.as_ref())?)
        .bind(to_json("delivery_address", order.delivery_address.as_ref())?)
        .bind(order.priority)
        .bind(&order.notes)
        .bind(order.updated_at)
        .bind(&order.id)
        .bind(order.version)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::concurrent("Order", &order.id));
        }
        order.version += 1;

        replace_lines(&mut *self.conn, LineTable::Order, &order.id, &order.lines).await
    }

    async fn hydrate(&mut self, row: OrderRow) -> DbResult<Order> {
        let lines = load_lines(&mut *self.conn, LineTable::Order, &row.id).await?;

        let order = Order {
            vat_rate: rate_from_row("vat_rate_bps", row.vat_rate_bps)?,
            totals: totals_from_row(
                row.subtotal_cents,
                row.vat_cents,
                row.discount_cents,
                row.total_cents,
            ),
            proof_of_payment: from_json::<ProofOfPayment>("proof_of_payment", row.proof_of_payment)?,
            delivery_address: from_json::<Address>("delivery_address", row.delivery_address)?,
            id: row.id,
            order_number: row.order_number,
            customer_id: row.customer_id,
            lines,
            status: row.status,
            held_from: row.held_from,
            payment_method: row.payment_method,
            payment_status: row.payment_status,
            priority: row.priority,
            source_quote_id: row.source_quote_id,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        };

        order.verify_totals().map_err(invariant)?;
        Ok(order)
    }
}
