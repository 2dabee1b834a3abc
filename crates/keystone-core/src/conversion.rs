//! # Cross-Document Conversion
//!
//! Documents derived from other documents.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Quote (PENDING | ACCEPTED) ──quote_to_order──► Order (PENDING)         │
//! │     status → CONVERTED, order_id set            source_quote_id set     │
//! │                                                                         │
//! │  Order (not CANCELLED) ──order_to_invoice──► Invoice (DRAFT)            │
//! │     at most one invoice per order                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lines are deep-copied with fresh ids, so editing the new document never
//! touches the one it came from.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::invoice::{Invoice, InvoiceDraft};
use crate::line_item::copy_lines;
use crate::money::Money;
use crate::order::{Order, OrderStatus};
use crate::quote::Quote;
use crate::types::{Customer, DocumentKind, LedgerSettings};

/// Converts a quote into a PENDING order and marks the quote CONVERTED.
///
/// The order keeps the quote's VAT rate, so its total is identical.
pub fn quote_to_order(
    quote: &mut Quote,
    customer: &Customer,
    order_id: String,
    order_number: String,
    settings: &LedgerSettings,
    now: DateTime<Utc>,
) -> CoreResult<Order> {
    let customer_id = quote.ensure_convertible(now.date_naive())?;
    if customer_id != customer.id {
        return Err(CoreError::not_found("customer", customer_id));
    }

    let settings = LedgerSettings {
        vat_rate: quote.vat_rate,
        ..*settings
    };
    let mut order = Order::new(
        order_id,
        order_number,
        customer.id.clone(),
        copy_lines(&quote.lines),
        &settings,
        now,
    )?;
    order.source_quote_id = Some(quote.id.clone());
    order.delivery_address = customer.default_address.clone();
    order.notes = quote.notes.clone();

    quote.mark_converted(&order.id, now);
    Ok(order)
}

/// Caller choices for a generated invoice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceOptions {
    /// Overrides issue date + payment terms.
    #[ts(as = "Option<String>")]
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    #[serde(default)]
    pub discount: Money,
}

/// Opens a DRAFT invoice for `order`.
///
/// `existing_invoice_id` is the invoice already raised for this order, if any.
#[allow(clippy::too_many_arguments)]
pub fn order_to_invoice(
    order: &Order,
    existing_invoice_id: Option<&str>,
    customer: &Customer,
    invoice_id: String,
    invoice_number: String,
    options: InvoiceOptions,
    settings: &LedgerSettings,
    now: DateTime<Utc>,
) -> CoreResult<Invoice> {
    if let Some(existing) = existing_invoice_id {
        return Err(CoreError::AlreadyInvoiced {
            number: order.order_number.clone(),
            invoice_id: existing.to_string(),
        });
    }
    if order.status == OrderStatus::Cancelled {
        return Err(CoreError::DocumentLocked {
            document: DocumentKind::Order,
            number: order.order_number.clone(),
            status: order.status.to_string(),
        });
    }
    if order.customer_id != customer.id {
        return Err(CoreError::not_found("customer", order.customer_id.clone()));
    }

    let draft = InvoiceDraft {
        customer_id: customer.id.clone(),
        order_id: Some(order.id.clone()),
        lines: copy_lines(&order.lines),
        discount: options.discount,
        payment_terms_days: customer.payment_terms_or(settings.default_payment_terms_days),
        due_date: options.due_date,
        notes: options.notes,
    };
    Invoice::new(invoice_id, invoice_number, draft, order.vat_rate, now)
}

// =============================================================================
// Unit Tests
// =============================================================================
