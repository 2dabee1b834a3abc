//! # Quote Repository

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use keystone_core::{ContactSnapshot, Quote, QuoteStatus};

use super::order::{rate_from_row, totals_from_row};
use super::{from_json, invariant, load_lines, replace_lines, to_json, LineTable};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct QuoteRow {
    id: String,
    quote_number: String,
    customer_id: Option<String>,
    contact: Option<String>,
    vat_rate_bps: i64,
    subtotal_cents: i64,
    vat_cents: i64,
    discount_cents: i64,
    total_cents: i64,
    valid_until: NaiveDate,
    status: QuoteStatus,
    order_id: Option<String>,
    rejection_reason: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

const SELECT_QUOTE: &str = "SELECT id, quote_number, customer_id, contact, vat_rate_bps, \
     subtotal_cents, vat_cents, discount_cents, total_cents, valid_until, status, order_id, \
     rejection_reason, notes, created_at, updated_at, version FROM quotes";

pub struct QuoteRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> QuoteRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        QuoteRepository { conn }
    }

    pub async fn insert(&mut self, quote: &Quote) -> DbResult<()> {
        debug!(id = %quote.id, number = %quote.quote_number, "Inserting quote");

        sqlx::query(
            r#"
            INSERT INTO quotes (
                id, quote_number, customer_id, contact, vat_rate_bps,
                subtotal_cents, vat_cents, discount_cents, total_cents,
                valid_until, status, order_id, rejection_reason, notes,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&quote.id)
        .bind(&quote.quote_number)
        .bind(&quote.customer_id)
        .bind(to_json("contact", quote.contact.as_ref())?)
        .bind(i64::from(quote.vat_rate.bps()))
        .bind(quote.totals.subtotal.cents())
        .bind(quote.totals.vat.cents())
        .bind(quote.totals.discount.cents())
        .bind(quote.totals.total.cents())
        .bind(quote.valid_until)
        .bind(quote.status)
        .bind(&quote.order_id)
        .bind(&quote.rejection_reason)
        .bind(&quote.notes)
        .bind(quote.created_at)
        .bind(quote.updated_at)
        .bind(quote.version)
        .execute(&mut *self.conn)
        .await?;

        replace_lines(&mut *self.conn, LineTable::Quote, &quote.id, &quote.lines).await
    }

    pub async fn find(&mut self, id: &str) -> DbResult<Option<Quote>> {
        let sql = format!("{SELECT_QUOTE} WHERE id = ?");
        let row: Option<QuoteRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Quote> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("Quote", id))
    }

    pub async fn find_by_number(&mut self, number: &str) -> DbResult<Option<Quote>> {
        let sql = format!("{SELECT_QUOTE} WHERE quote_number = ?");
        let row: Option<QuoteRow> = sqlx::query_as(&sql)
            .bind(number)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// Open quotes (PENDING, SENT, VIEWED) whose validity ended before `today`.
    pub async fn list_expirable(&mut self, today: NaiveDate) -> DbResult<Vec<Quote>> {
        let sql = format!(
            "{SELECT_QUOTE} WHERE status IN (?, ?, ?) AND valid_until < ? ORDER BY valid_until"
        );
        let rows: Vec<QuoteRow> = sqlx::query_as(&sql)
            .bind(QuoteStatus::Pending)
            .bind(QuoteStatus::Sent)
            .bind(QuoteStatus::Viewed)
            .bind(today)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut quotes = Vec::with_capacity(rows.len());
        for row in rows {
            quotes.push(self.hydrate(row).await?);
        }
        Ok(quotes)
    }

    /// Saves every mutable column and the lines, then bumps `quote.version`.
    pub async fn update(&mut self, quote: &mut Quote) -> DbResult<()> {
        debug!(
            id = %quote.id,
            status = %quote.status,
            version = quote.version,
            "Updating quote"
        );

        let result = sqlx::query(
            r#"
            UPDATE quotes SET
                subtotal_cents = ?,
                vat_cents = ?,
                discount_cents = ?,
                total_cents = ?,
                status = ?,
                order_id = ?,
                rejection_reason = ?,
                notes = ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(quote.totals.subtotal.cents())
        .bind(quote.totals.vat.cents())
        .bind(quote.totals.discount.cents())
        .bind(quote.totals.total.cents())
        .bind(quote.status)
        .bind(&quote.order_id)
        .bind(&quote.rejection_reason)
        .bind(&quote.notes)
        .bind(quote.updated_at)
        .bind(&quote.id)
        .bind(quote.version)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::concurrent("Quote", &quote.id));
        }
        quote.version += 1;

        replace_lines(&mut *self.conn, LineTable::Quote, &quote.id, &quote.lines).await
    }

    async fn hydrate(&mut self, row: QuoteRow) -> DbResult<Quote> {
        let lines = load_lines(&mut *self.conn, LineTable::Quote, &row.id).await?;

        let quote = Quote {
            vat_rate: rate_from_row("vat_rate_bps", row.vat_rate_bps)?,
            totals: totals_from_row(
                row.subtotal_cents,
                row.vat_cents,
                row.discount_cents,
                row.total_cents,
            ),
            contact: from_json::<ContactSnapshot>("contact", row.contact)?,
            id: row.id,
            quote_number: row.quote_number,
            customer_id: row.customer_id,
            lines,
            valid_until: row.valid_until,
            status: row.status,
            order_id: row.order_id,
            rejection_reason: row.rejection_reason,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        };

        quote.verify_totals().map_err(invariant)?;
        Ok(quote)
    }
}
