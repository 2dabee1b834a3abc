//! # Invoice Repository
//!
//! Invoices, their line items and payments.
//!
//! Payments are append-only: [`InvoiceRepository::insert_payment`] is the
//! only write path, and an invoice's amount paid is always the sum of its
//! payment rows.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use keystone_core::{Invoice, InvoiceStatus, Money, Payment, PaymentMethod};

use super::order::{rate_from_row, totals_from_row};
use super::{invariant, load_lines, replace_lines, LineTable};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: String,
    invoice_number: String,
    order_id: Option<String>,
    customer_id: String,
    vat_rate_bps: i64,
    subtotal_cents: i64,
    vat_cents: i64,
    discount_cents: i64,
    total_cents: i64,
    issue_date: Option<NaiveDate>,
    due_date: NaiveDate,
    due_date_overridden: bool,
    payment_terms_days: i64,
    sent_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    status: InvoiceStatus,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: String,
    invoice_id: String,
    amount_cents: i64,
    method: PaymentMethod,
    reference: Option<String>,
    received_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            invoice_id: row.invoice_id,
            amount: Money::from_cents(row.amount_cents),
            method: row.method,
            reference: row.reference,
            received_at: row.received_at,
        }
    }
}

const SELECT_INVOICE: &str = "SELECT id, invoice_number, order_id, customer_id, vat_rate_bps, \
     subtotal_cents, vat_cents, discount_cents, total_cents, issue_date, due_date, \
     due_date_overridden, payment_terms_days, sent_at, cancelled_at, status, notes, \
     created_at, updated_at, version FROM invoices";

pub struct InvoiceRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> InvoiceRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        InvoiceRepository { conn }
    }

    /// Inserts the header and lines. A second invoice for the same order
    /// fails on the unique index with a duplicate `order_id`.
    pub async fn insert(&mut self, invoice: &Invoice) -> DbResult<()> {
        debug!(id = %invoice.id, number = %invoice.invoice_number, "Inserting invoice");

        let result = sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, order_id, customer_id, vat_rate_bps,
                subtotal_cents, vat_cents, discount_cents, total_cents,
                issue_date, due_date, due_date_overridden, payment_terms_days,
                sent_at, cancelled_at, status, notes,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invoice.id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.order_id)
        .bind(&invoice.customer_id)
        .bind(i64::from(invoice.vat_rate.bps()))
        .bind(invoice.totals.subtotal.cents())
        .bind(invoice.totals.vat.cents())
        .bind(invoice.totals.discount.cents())
        .bind(invoice.totals.total.cents())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.due_date_overridden)
        .bind(i64::from(invoice.payment_terms_days))
        .bind(invoice.sent_at)
        .bind(invoice.cancelled_at)
        .bind(invoice.status)
        .bind(&invoice.notes)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .bind(invoice.version)
        .execute(&mut *self.conn)
        .await;

        if let Err(err) = result {
            return Err(match DbError::from(err) {
                DbError::UniqueViolation { field, .. } if field.ends_with("order_id") => {
                    DbError::duplicate("order_id", invoice.order_id.clone().unwrap_or_default())
                }
                other => other,
            });
        }

        replace_lines(&mut *self.conn, LineTable::Invoice, &invoice.id, &invoice.lines).await
    }

    pub async fn find(&mut self, id: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("{SELECT_INVOICE} WHERE id = ?");
        let row: Option<InvoiceRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Invoice> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", id))
    }

    pub async fn find_by_number(&mut self, number: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("{SELECT_INVOICE} WHERE invoice_number = ?");
        let row: Option<InvoiceRow> = sqlx::query_as(&sql)
            .bind(number)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// Id of the invoice raised for `order_id`, if any.
    pub async fn id_for_order(&mut self, order_id: &str) -> DbResult<Option<String>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM invoices WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(id)
    }

    /// Sent, unpaid invoices whose due date is before `today` but that are
    /// not yet marked OVERDUE.
    pub async fn list_overdue_candidates(&mut self, today: NaiveDate) -> DbResult<Vec<Invoice>> {
        let sql = format!("{SELECT_INVOICE} WHERE status IN (?, ?) AND due_date < ? ORDER BY due_date");
        let rows: Vec<InvoiceRow> = sqlx::query_as(&sql)
            .bind(InvoiceStatus::Sent)
            .bind(InvoiceStatus::PartiallyPaid)
            .bind(today)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut invoices = Vec::with_capacity(rows.len());
        for row in rows {
            invoices.push(self.hydrate(row).await?);
        }
        Ok(invoices)
    }

    pub async fn list_all(&mut self) -> DbResult<Vec<Invoice>> {
        let sql = format!("{SELECT_INVOICE} ORDER BY created_at");
        let rows: Vec<InvoiceRow> = sqlx::query_as(&sql).fetch_all(&mut *self.conn).await?;

        let mut invoices = Vec::with_capacity(rows.len());
        for row in rows {
            invoices.push(self.hydrate(row).await?);
        }
        Ok(invoices)
    }

    /// Saves the header and lines, then bumps `invoice.version`.
    ///
    /// Payments are not touched; see [`insert_payment`](Self::insert_payment).
    pub async fn update(&mut self, invoice: &mut Invoice) -> DbResult<()> {
        debug!(
            id = %invoice.id,
            status = %invoice.status,
            version = invoice.version,
            "Updating invoice"
        );

        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                subtotal_cents = ?,
                vat_cents = ?,
                discount_cents = ?,
                total_cents = ?,
                issue_date = ?,
                due_date = ?,
                sent_at = ?,
                cancelled_at = ?,
                status = ?,
                notes = ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(invoice.totals.subtotal.cents())
        .bind(invoice.totals.vat.cents())
        .bind(invoice.totals.discount.cents())
        .bind(invoice.totals.total.cents())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.sent_at)
        .bind(invoice.cancelled_at)
        .bind(invoice.status)
        .bind(&invoice.notes)
        .bind(invoice.updated_at)
        .bind(&invoice.id)
        .bind(invoice.version)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::concurrent("Invoice", &invoice.id));
        }
        invoice.version += 1;

        replace_lines(&mut *self.conn, LineTable::Invoice, &invoice.id, &invoice.lines).await
    }

    pub async fn insert_payment(&mut self, payment: &Payment) -> DbResult<()> {
        debug!(
            id = %payment.id,
            invoice_id = %payment.invoice_id,
            amount = %payment.amount,
            "Recording payment"
        );

        sqlx::query(
            r#"
            INSERT INTO payments (id, invoice_id, amount_cents, method, reference, received_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.invoice_id)
        .bind(payment.amount.cents())
        .bind(payment.method)
        .bind(&payment.reference)
        .bind(payment.received_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    async fn load_payments(&mut self, invoice_id: &str) -> DbResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(
            r#"
            SELECT id, invoice_id, amount_cents, method, reference, received_at
            FROM payments WHERE invoice_id = ?
            ORDER BY received_at, rowid
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.into_iter().map(Payment::from).collect())
    }

    async fn hydrate(&mut self, row: InvoiceRow) -> DbResult<Invoice> {
        let lines = load_lines(&mut *self.conn, LineTable::Invoice, &row.id).await?;
        let payments = self.load_payments(&row.id).await?;

        let invoice = Invoice {
            vat_rate: rate_from_row("vat_rate_bps", row.vat_rate_bps)?,
            totals: totals_from_row(
                row.subtotal_cents,
                row.vat_cents,
                row.discount_cents,
                row.total_cents,
            ),
            payment_terms_days: u32::try_from(row.payment_terms_days)
                .map_err(|e| DbError::decode("payment_terms_days", e))?,
            id: row.id,
            invoice_number: row.invoice_number,
            order_id: row.order_id,
            customer_id: row.customer_id,
            lines,
            issue_date: row.issue_date,
            due_date: row.due_date,
            due_date_overridden: row.due_date_overridden,
            sent_at: row.sent_at,
            cancelled_at: row.cancelled_at,
            status: row.status,
            payments,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        };

        invoice.verify_totals().map_err(invariant)?;
        Ok(invoice)
    }
}
