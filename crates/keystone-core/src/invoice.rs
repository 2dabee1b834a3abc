//! # Invoices and Payments
//!
//! Invoice status is never set directly. It is a projection of the facts
//! recorded on the invoice, recomputed by [`InvoiceStatus::derive`].
//!
//! ## Status Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cancelled_at set?          ──yes──► CANCELLED                          │
//! │        │ no                                                             │
//! │  sent_at set?               ──no───► DRAFT                              │
//! │        │ yes                                                            │
//! │  amount_due == 0?           ──yes──► PAID                               │
//! │        │ no                                                             │
//! │  today > due_date?          ──yes──► OVERDUE                            │
//! │        │ no                                                             │
//! │  0 < amount_due < total?    ──yes──► PARTIALLY_PAID                     │
//! │        │ no                                                             │
//! │        └───────────────────────────► SENT                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Payment Workflow
//! ```text
//! Invoice total 1150.00, SENT
//!      │
//!      ▼  apply_payment(500.00)
//! amount_paid 500.00, amount_due 650.00 → PARTIALLY_PAID
//!      │
//!      ▼  apply_payment(650.00)
//! amount_paid 1150.00, amount_due 0.00 → PAID
//!      │
//!      ▼  apply_payment(1.00)
//! OverApplication (nothing recorded)
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, InvariantViolation};
use crate::line_item::{build_lines, LineItem, LineItemInput, Totals};
use crate::money::{Money, TaxRate};
use crate::types::{DocumentKind, PaymentMethod};
use crate::validation::validate_payment_terms;

// =============================================================================
// Invoice Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    /// The single status function. Every stored status came from here.
    pub fn derive(
        sent: bool,
        cancelled: bool,
        amount_paid: Money,
        total: Money,
        due_date: NaiveDate,
        today: NaiveDate,
    ) -> InvoiceStatus {
        let amount_due = total - amount_paid;

        if cancelled {
            InvoiceStatus::Cancelled
        } else if !sent {
            InvoiceStatus::Draft
        } else if amount_due.is_zero() {
            InvoiceStatus::Paid
        } else if today > due_date {
            InvoiceStatus::Overdue
        } else if amount_paid.is_positive() {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Sent
        }
    }

    /// Counts towards receivables.
    pub fn is_outstanding(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid | InvoiceStatus::Overdue
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::PartiallyPaid => "PARTIALLY_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A payment received against an invoice. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
    /// Bank reference, cheque number, card slip.
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub received_at: DateTime<Utc>,
}

// =============================================================================
// Invoice
// =============================================================================

/// Everything needed to open a draft invoice.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub customer_id: String,
    pub order_id: Option<String>,
    pub lines: Vec<LineItem>,
    pub discount: Money,
    pub payment_terms_days: u32,
    /// Explicit due date; otherwise issue date + payment terms.
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    /// Human-readable number (e.g., "INV-2026-00042")
    pub invoice_number: String,
    pub order_id: Option<String>,
    pub customer_id: String,
    pub lines: Vec<LineItem>,
    pub vat_rate: TaxRate,
    pub totals: Totals,
    /// Set when the invoice is sent.
    #[ts(as = "Option<String>")]
    pub issue_date: Option<NaiveDate>,
    #[ts(as = "String")]
    pub due_date: NaiveDate,
    pub due_date_overridden: bool,
    pub payment_terms_days: u32,
    #[ts(as = "Option<String>")]
    pub sent_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub status: InvoiceStatus,
    /// In the order received.
    pub payments: Vec<Payment>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Invoice {
    /// Opens a DRAFT invoice.
    ///
    /// Until it is sent, the due date counts from the creation date.
    pub fn new(
        id: String,
        invoice_number: String,
        draft: InvoiceDraft,
        vat_rate: TaxRate,
        now: DateTime<Utc>,
    ) -> CoreResult<Invoice> {
        validate_payment_terms(draft.payment_terms_days)?;
        let totals = Totals::compute(&draft.lines, vat_rate, draft.discount)?;
        let due_date_overridden = draft.due_date.is_some();
        let due_date = draft
            .due_date
            .unwrap_or_else(|| now.date_naive() + Duration::days(i64::from(draft.payment_terms_days)));

        Ok(Invoice {
            id,
            invoice_number,
            order_id: draft.order_id,
            customer_id: draft.customer_id,
            lines: draft.lines,
            vat_rate,
            totals,
            issue_date: None,
            due_date,
            due_date_overridden,
            payment_terms_days: draft.payment_terms_days,
            sent_at: None,
            cancelled_at: None,
            status: InvoiceStatus::Draft,
            payments: Vec::new(),
            notes: draft.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    /// Σ payments.
    pub fn amount_paid(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }

    /// total − amount_paid.
    pub fn amount_due(&self) -> Money {
        self.totals.total - self.amount_paid()
    }

    fn derive_status(&self, today: NaiveDate) -> InvoiceStatus {
        InvoiceStatus::derive(
            self.sent_at.is_some(),
            self.cancelled_at.is_some(),
            self.amount_paid(),
            self.totals.total,
            self.due_date,
            today,
        )
    }

    /// Recomputes the status. Returns whether it changed.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) -> bool {
        let status = self.derive_status(now.date_naive());
        if status == self.status {
            return false;
        }
        self.status = status;
        self.updated_at = now;
        true
    }

    /// DRAFT → SENT.
    ///
    /// Sets the issue date if unset and, unless the due date was given
    /// explicitly, moves it to issue date + payment terms.
    pub fn send(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(self.invalid_transition(InvoiceStatus::Sent));
        }

        let issue_date = *self.issue_date.get_or_insert(now.date_naive());
        if !self.due_date_overridden {
            self.due_date = issue_date + Duration::days(i64::from(self.payment_terms_days));
        }
        self.sent_at = Some(now);
        self.updated_at = now;
        self.refresh_status(now);
        Ok(())
    }

    /// Records a payment and re-derives the status.
    ///
    /// ## Errors
    /// Checked in this order, before anything is recorded:
    /// - `InvalidAmount` for amount ≤ 0
    /// - `InvoiceLocked` for a cancelled invoice
    /// - `InvalidTransition` DRAFT → SENT for an unsent invoice
    /// - `OverApplication` when amount > amount due
    pub fn apply_payment(
        &mut self,
        payment_id: String,
        amount: Money,
        method: PaymentMethod,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<&Payment> {
        if !amount.is_positive() {
            return Err(CoreError::InvalidAmount { amount });
        }
        if self.cancelled_at.is_some() {
            return Err(CoreError::InvoiceLocked {
                number: self.invoice_number.clone(),
                reason: "invoice is cancelled".to_string(),
            });
        }
        if self.sent_at.is_none() {
            return Err(self.invalid_transition(InvoiceStatus::Sent));
        }
        let amount_due = self.amount_due();
        if amount > amount_due {
            return Err(CoreError::OverApplication { amount, amount_due });
        }

        let index = self.payments.len();
        self.payments.push(Payment {
            id: payment_id,
            invoice_id: self.id.clone(),
            amount,
            method,
            reference: reference.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            received_at: now,
        });
        debug_assert!(self.amount_paid() <= self.totals.total);
        self.updated_at = now;
        self.refresh_status(now);
        Ok(&self.payments[index])
    }

    /// Cancels an invoice nothing has been paid into.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.cancelled_at.is_some() {
            return Err(self.invalid_transition(InvoiceStatus::Cancelled));
        }
        if self.amount_paid().is_positive() {
            return Err(CoreError::InvoiceLocked {
                number: self.invoice_number.clone(),
                reason: format!("{} has already been paid", self.amount_paid()),
            });
        }

        self.cancelled_at = Some(now);
        self.updated_at = now;
        self.refresh_status(now);
        Ok(())
    }

    /// Replaces the lines and discount of a DRAFT invoice.
    pub fn replace_lines(
        &mut self,
        inputs: Vec<LineItemInput>,
        discount: Money,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(CoreError::DocumentLocked {
                document: DocumentKind::Invoice,
                number: self.invoice_number.clone(),
                status: self.status.to_string(),
            });
        }

        let lines = build_lines(inputs)?;
        self.totals = Totals::compute(&lines, self.vat_rate, discount)?;
        self.lines = lines;
        self.updated_at = now;
        Ok(())
    }

    pub fn verify_totals(&self) -> Result<(), InvariantViolation> {
        let undiscounted = Totals::undiscounted(&self.lines, self.vat_rate);
        let recomputed = Totals {
            discount: self.totals.discount,
            total: undiscounted.total - self.totals.discount,
            ..undiscounted
        };
        self.totals
            .verify(&recomputed, DocumentKind::Invoice, &self.invoice_number)?;

        let paid = self.amount_paid();
        if paid > self.totals.total {
            return Err(InvariantViolation::TotalsMismatch {
                document: DocumentKind::Invoice,
                number: self.invoice_number.clone(),
                field: "amount_paid",
                expected: self.totals.total,
                stored: paid,
            });
        }
        Ok(())
    }

    fn invalid_transition(&self, to: InvoiceStatus) -> CoreError {
        CoreError::InvalidTransition {
            document: DocumentKind::Invoice,
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::LineItemInput;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn invoice() -> Invoice {
        let line =
            LineItem::from_input(LineItemInput::custom("Widget", 10, Money::from_cents(10_000)))
                .unwrap();
        let draft = InvoiceDraft {
            customer_id: "cust-1".to_string(),
            order_id: Some("ord-1".to_string()),
            lines: vec![line],
            discount: Money::zero(),
            payment_terms_days: 30,
            due_date: None,
            notes: None,
        };
        Invoice::new(
            "inv-1".to_string(),
            "INV-2026-00001".to_string(),
            draft,
            TaxRate::STANDARD_VAT,
            now(),
        )
        .unwrap()
    }

    fn pay(invoice: &mut Invoice, cents: i64, at: DateTime<Utc>) -> CoreResult<()> {
        let id = format!("pay-{}", invoice.payments.len() + 1);
        invoice
            .apply_payment(id, Money::from_cents(cents), PaymentMethod::BankTransfer, None, at)
            .map(|_| ())
    }

    #[test]
    fn test_partial_then_full_payment() {
        let mut inv = invoice();
        inv.send(now()).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Sent);
        assert_eq!(inv.totals.total.to_string(), "1150.00");

        pay(&mut inv, 50_000, now()).unwrap();
        assert_eq!(inv.amount_due().to_string(), "650.00");
        assert_eq!(inv.status, InvoiceStatus::PartiallyPaid);

        pay(&mut inv, 65_000, now()).unwrap();
        assert_eq!(inv.amount_due().to_string(), "0.00");
        assert_eq!(inv.status, InvoiceStatus::Paid);

        let err = pay(&mut inv, 100, now()).unwrap_err();
        assert!(matches!(err, CoreError::OverApplication { .. }));
        assert_eq!(inv.payments.len(), 2);
    }

    #[test]
    fn test_payment_guards() {
        let mut inv = invoice();
        assert!(matches!(
            pay(&mut inv, 100, now()),
            Err(CoreError::InvalidTransition { .. })
        ));

        inv.send(now()).unwrap();
        assert!(matches!(pay(&mut inv, 0, now()), Err(CoreError::InvalidAmount { .. })));
        assert!(matches!(pay(&mut inv, -5, now()), Err(CoreError::InvalidAmount { .. })));

        inv.cancel(now()).unwrap();
        assert!(matches!(pay(&mut inv, 100, now()), Err(CoreError::InvoiceLocked { .. })));
        assert!(inv.payments.is_empty());
    }

    #[test]
    fn test_send_sets_issue_and_due_date() {
        let mut inv = invoice();
        let later = now() + Duration::days(3);
        inv.send(later).unwrap();

        assert_eq!(inv.issue_date, Some(later.date_naive()));
        assert_eq!(inv.due_date, later.date_naive() + Duration::days(30));
        assert!(matches!(inv.send(later), Err(CoreError::InvalidTransition { .. })));
    }

    #[test]
    fn test_overdue_sweep() {
        let mut inv = invoice();
        inv.send(now()).unwrap();
        pay(&mut inv, 10_000, now()).unwrap();

        // due date itself is not overdue
        assert!(!inv.refresh_status(now() + Duration::days(30)));
        assert_eq!(inv.status, InvoiceStatus::PartiallyPaid);

        assert!(inv.refresh_status(now() + Duration::days(31)));
        assert_eq!(inv.status, InvoiceStatus::Overdue);
        assert!(!inv.refresh_status(now() + Duration::days(31)));

        // settling an overdue invoice makes it PAID
        pay(&mut inv, 105_000, now() + Duration::days(40)).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Paid);
    }

    #[test]
    fn test_cancel_rules() {
        let mut inv = invoice();
        inv.send(now()).unwrap();
        pay(&mut inv, 100, now()).unwrap();
        assert!(matches!(inv.cancel(now()), Err(CoreError::InvoiceLocked { .. })));

        let mut unpaid = invoice();
        unpaid.cancel(now()).unwrap();
        assert_eq!(unpaid.status, InvoiceStatus::Cancelled);
        assert!(matches!(unpaid.cancel(now()), Err(CoreError::InvalidTransition { .. })));
    }

    #[test]
    fn test_derive_is_pure() {
        let due = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let total = Money::from_cents(1_000);
        let before = NaiveDate::from_ymd_opt(2026, 4, 30).unwrap();
        let after = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();

        use InvoiceStatus::*;
        assert_eq!(InvoiceStatus::derive(false, false, Money::zero(), total, due, after), Draft);
        assert_eq!(InvoiceStatus::derive(true, true, Money::zero(), total, due, after), Cancelled);
        assert_eq!(InvoiceStatus::derive(true, false, total, total, due, after), Paid);
        assert_eq!(InvoiceStatus::derive(true, false, Money::zero(), total, due, before), Sent);
        assert_eq!(
            InvoiceStatus::derive(true, false, Money::from_cents(1), total, due, before),
            PartiallyPaid
        );
        assert_eq!(
            InvoiceStatus::derive(true, false, Money::from_cents(1), total, due, after),
            Overdue
        );
    }

    #[test]
    fn test_lines_editable_only_in_draft() {
        let mut inv = invoice();
        inv.replace_lines(
            vec![LineItemInput::custom("Labour", 2, Money::from_cents(40_000))],
            Money::from_cents(2_000),
            now(),
        )
        .unwrap();
        assert_eq!(inv.totals.total.cents(), 80_000 + 12_000 - 2_000);
        assert!(inv.verify_totals().is_ok());

        inv.send(now()).unwrap();
        assert!(matches!(
            inv.replace_lines(
                vec![LineItemInput::custom("Labour", 1, Money::from_cents(1))],
                Money::zero(),
                now()
            ),
            Err(CoreError::DocumentLocked { .. })
        ));
    }
}
