//! # Purchase Order Repository
//!
//! Purchase orders, their lines and receiving history.
//!
//! Unlike sales documents, PO lines carry a running `quantity_received`
//! and are referenced by receiving lines, so they are upserted by id
//! instead of deleted and re-inserted.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use keystone_core::{PoLineItem, PoStatus, PurchaseOrder, ReceivingEvent, ReceivingLine};

use super::order::{rate_from_row, totals_from_row};
use super::{invariant, LineRow};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct PurchaseOrderRow {
    id: String,
    po_number: String,
    supplier_id: String,
    vat_rate_bps: i64,
    subtotal_cents: i64,
    vat_cents: i64,
    discount_cents: i64,
    total_cents: i64,
    order_date: NaiveDate,
    expected_date: Option<NaiveDate>,
    status: PoStatus,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct PoLineRow {
    #[sqlx(flatten)]
    line: LineRow,
    quantity_received: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ReceivingEventRow {
    id: String,
    purchase_order_id: String,
    notes: Option<String>,
    received_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReceivingLineRow {
    po_line_item_id: String,
    quantity_received_now: i64,
    quantity_accepted: i64,
    quantity_rejected: i64,
    rejection_reason: Option<String>,
}

impl From<ReceivingLineRow> for ReceivingLine {
    fn from(row: ReceivingLineRow) -> Self {
        ReceivingLine {
            po_line_item_id: row.po_line_item_id,
            quantity_received_now: row.quantity_received_now,
            quantity_accepted: row.quantity_accepted,
            quantity_rejected: row.quantity_rejected,
            rejection_reason: row.rejection_reason,
        }
    }
}

const SELECT_PURCHASE_ORDER: &str = "SELECT id, po_number, supplier_id, vat_rate_bps, \
     subtotal_cents, vat_cents, discount_cents, total_cents, order_date, expected_date, \
     status, notes, created_at, updated_at, version FROM purchase_orders";

pub struct PurchaseOrderRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> PurchaseOrderRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        PurchaseOrderRepository { conn }
    }

    pub async fn insert(&mut self, po: &PurchaseOrder) -> DbResult<()> {
        debug!(id = %po.id, number = %po.po_number, "Inserting purchase order");

        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, po_number, supplier_id, vat_rate_bps,
                subtotal_cents, vat_cents, discount_cents, total_cents,
                order_date, expected_date, status, notes,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&po.id)
        .bind(&po.po_number)
        .bind(&po.supplier_id)
        .bind(i64::from(po.vat_rate.bps()))
        .bind(po.totals.subtotal.cents())
        .bind(po.totals.vat.cents())
        .bind(po.totals.discount.cents())
        .bind(po.totals.total.cents())
        .bind(po.order_date)
        .bind(po.expected_date)
        .bind(po.status)
        .bind(&po.notes)
        .bind(po.created_at)
        .bind(po.updated_at)
        .bind(po.version)
        .execute(&mut *self.conn)
        .await?;

        self.save_lines(po).await
    }

    pub async fn find(&mut self, id: &str) -> DbResult<Option<PurchaseOrder>> {
        let sql = format!("{SELECT_PURCHASE_ORDER} WHERE id = ?");
        let row: Option<PurchaseOrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get(&mut self, id: &str) -> DbResult<PurchaseOrder> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("PurchaseOrder", id))
    }

    /// Saves the header and lines, then bumps `po.version`.
    ///
    /// Receiving events are written separately with
    /// [`insert_receiving_event`](Self::insert_receiving_event).
    pub async fn update(&mut self, po: &mut PurchaseOrder) -> DbResult<()> {
        debug!(
            id = %po.id,
            status = %po.status,
            version = po.version,
            "Updating purchase order"
        );

        let result = sqlx::query(
            r#"
            UPDATE purchase_orders SET
                subtotal_cents = ?,
                vat_cents = ?,
                discount_cents = ?,
                total_cents = ?,
                expected_date = ?,
                status = ?,
                notes = ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(po.totals.subtotal.cents())
        .bind(po.totals.vat.cents())
        .bind(po.totals.discount.cents())
        .bind(po.totals.total.cents())
        .bind(po.expected_date)
        .bind(po.status)
        .bind(&po.notes)
        .bind(po.updated_at)
        .bind(&po.id)
        .bind(po.version)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::concurrent("PurchaseOrder", &po.id));
        }
        po.version += 1;

        self.save_lines(po).await
    }

    /// Writes a receiving event and its lines.
    pub async fn insert_receiving_event(&mut self, event: &ReceivingEvent) -> DbResult<()> {
        debug!(
            id = %event.id,
            purchase_order_id = %event.purchase_order_id,
            lines = event.lines.len(),
            "Recording receipt"
        );

        sqlx::query(
            r#"
            INSERT INTO receiving_events (id, purchase_order_id, notes, received_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.purchase_order_id)
        .bind(&event.notes)
        .bind(event.received_at)
        .execute(&mut *self.conn)
        .await?;

        for (position, line) in event.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO receiving_lines (
                    receiving_event_id, po_line_item_id, position,
                    quantity_received_now, quantity_accepted, quantity_rejected,
                    rejection_reason
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.id)
            .bind(&line.po_line_item_id)
            .bind(position as i64)
            .bind(line.quantity_received_now)
            .bind(line.quantity_accepted)
            .bind(line.quantity_rejected)
            .bind(&line.rejection_reason)
            .execute(&mut *self.conn)
            .await?;
        }

        Ok(())
    }

    /// Upserts every current line and drops lines no longer on the order.
    async fn save_lines(&mut self, po: &PurchaseOrder) -> DbResult<()> {
        for (position, po_line) in po.lines.iter().enumerate() {
            let line = &po_line.line;
            sqlx::query(
                r#"
                INSERT INTO po_line_items (
                    id, purchase_order_id, position, product_id, description, sku,
                    quantity, unit_price_cents, line_total_cents, quantity_received
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    position = excluded.position,
                    product_id = excluded.product_id,
                    description = excluded.description,
                    sku = excluded.sku,
                    quantity = excluded.quantity,
                    unit_price_cents = excluded.unit_price_cents,
                    line_total_cents = excluded.line_total_cents,
                    quantity_received = excluded.quantity_received
                "#,
            )
            .bind(&line.id)
            .bind(&po.id)
            .bind(position as i64)
            .bind(&line.product_id)
            .bind(&line.description)
            .bind(&line.sku)
            .bind(line.quantity)
            .bind(line.unit_price.cents())
            .bind(line.line_total().cents())
            .bind(po_line.quantity_received)
            .execute(&mut *self.conn)
            .await?;
        }

        let current: Vec<&str> = po.lines.iter().map(|l| l.line.id.as_str()).collect();
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT id FROM po_line_items WHERE purchase_order_id = ?")
                .bind(&po.id)
                .fetch_all(&mut *self.conn)
                .await?;

        for stale in existing.iter().filter(|id| !current.contains(&id.as_str())) {
            sqlx::query("DELETE FROM po_line_items WHERE id = ?")
                .bind(stale)
                .execute(&mut *self.conn)
                .await?;
        }

        Ok(())
    }

    async fn load_lines(&mut self, po_id: &str) -> DbResult<Vec<PoLineItem>> {
        let rows: Vec<PoLineRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, description, sku, quantity, unit_price_cents,
                   line_total_cents, quantity_received
            FROM po_line_items WHERE purchase_order_id = ?
            ORDER BY position
            "#,
        )
        .bind(po_id)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PoLineItem {
                    line: row.line.into_line()?,
                    quantity_received: row.quantity_received,
                })
            })
            .collect()
    }

    async fn load_receipts(&mut self, po_id: &str) -> DbResult<Vec<ReceivingEvent>> {
        let rows: Vec<ReceivingEventRow> = sqlx::query_as(
            r#"
            SELECT id, purchase_order_id, notes, received_at
            FROM receiving_events WHERE purchase_order_id = ?
            ORDER BY received_at, rowid
            "#,
        )
        .bind(po_id)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut receipts = Vec::with_capacity(rows.len());
        for row in rows {
            let lines: Vec<ReceivingLineRow> = sqlx::query_as(
                r#"
                SELECT po_line_item_id, quantity_received_now, quantity_accepted,
                       quantity_rejected, rejection_reason
                FROM receiving_lines WHERE receiving_event_id = ?
                ORDER BY position
                "#,
            )
            .bind(&row.id)
            .fetch_all(&mut *self.conn)
            .await?;

            receipts.push(ReceivingEvent {
                id: row.id,
                purchase_order_id: row.purchase_order_id,
                lines: lines.into_iter().map(ReceivingLine::from).collect(),
                notes: row.notes,
                received_at: row.received_at,
            });
        }
        Ok(receipts)
    }

    async fn hydrate(&mut self, row: PurchaseOrderRow) -> DbResult<PurchaseOrder> {
        let lines = self.load_lines(&row.id).await?;
        let receipts = self.load_receipts(&row.id).await?;

        let po = PurchaseOrder {
            vat_rate: rate_from_row("vat_rate_bps", row.vat_rate_bps)?,
            totals: totals_from_row(
                row.subtotal_cents,
                row.vat_cents,
                row.discount_cents,
                row.total_cents,
            ),
            id: row.id,
            po_number: row.po_number,
            supplier_id: row.supplier_id,
            lines,
            order_date: row.order_date,
            expected_date: row.expected_date,
            status: row.status,
            receipts,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        };

        po.verify_totals().map_err(invariant)?;
        Ok(po)
    }
}
