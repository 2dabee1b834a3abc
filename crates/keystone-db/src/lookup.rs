//! # Lookup
//!
//! Read-only answers for conversational collaborators: "where is order
//! ORD-2026-00012?", "is BRK-1 in stock?". Nothing here writes.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use keystone_core::{Clock, InvoiceStatus, Money, OrderStatus, PaymentStatus, QuoteStatus};

use crate::error::EngineResult;
use crate::repository::{InvoiceRepository, OrderRepository, ProductRepository, QuoteRepository};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: Money,
    pub awaiting_pop_review: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummary {
    pub quote_number: String,
    pub status: QuoteStatus,
    pub total: Money,
    pub valid_until: NaiveDate,
    /// Past `valid_until` but not yet swept to EXPIRED.
    pub lapsed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub total: Money,
    pub amount_due: Money,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAvailability {
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    pub stock_quantity: i64,
    pub is_active: bool,
}

impl ProductAvailability {
    pub fn can_supply(&self, quantity: i64) -> bool {
        self.is_active && self.stock_quantity >= quantity
    }
}

/// Status and catalogue queries by business key.
#[derive(Clone)]
pub struct Lookup {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl Lookup {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Lookup { pool, clock }
    }

    pub async fn order_status(&self, order_number: &str) -> EngineResult<Option<OrderSummary>> {
        debug!(order_number, "Looking up order");
        let mut conn = self.pool.acquire().await?;
        let order = OrderRepository::new(&mut conn).find_by_number(order_number).await?;

        Ok(order.map(|order| OrderSummary {
            awaiting_pop_review: order
                .proof_of_payment
                .as_ref()
                .is_some_and(|p| p.is_awaiting_review()),
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            total: order.totals.total,
        }))
    }

    pub async fn quote_status(&self, quote_number: &str) -> EngineResult<Option<QuoteSummary>> {
        debug!(quote_number, "Looking up quote");
        let mut conn = self.pool.acquire().await?;
        let quote = QuoteRepository::new(&mut conn).find_by_number(quote_number).await?;
        let today = self.clock.today();

        Ok(quote.map(|quote| QuoteSummary {
            lapsed: quote.status.is_open() && quote.is_expired(today),
            quote_number: quote.quote_number,
            status: quote.status,
            total: quote.totals.total,
            valid_until: quote.valid_until,
        }))
    }

    pub async fn invoice_status(
        &self,
        invoice_number: &str,
    ) -> EngineResult<Option<InvoiceSummary>> {
        debug!(invoice_number, "Looking up invoice");
        let mut conn = self.pool.acquire().await?;
        let invoice = InvoiceRepository::new(&mut conn)
            .find_by_number(invoice_number)
            .await?;

        Ok(invoice.map(|invoice| InvoiceSummary {
            amount_due: invoice.amount_due(),
            invoice_number: invoice.invoice_number,
            status: invoice.status,
            total: invoice.totals.total,
            due_date: invoice.due_date,
        }))
    }

    pub async fn product(&self, sku: &str) -> EngineResult<Option<ProductAvailability>> {
        debug!(sku, "Looking up product");
        let mut conn = self.pool.acquire().await?;
        let product = ProductRepository::new(&mut conn)
            .find_by_sku(&sku.trim().to_uppercase())
            .await?;

        Ok(product.map(|p| ProductAvailability {
            sku: p.sku,
            name: p.name,
            unit_price: p.unit_price,
            stock_quantity: p.stock_quantity,
            is_active: p.is_active,
        }))
    }
}
