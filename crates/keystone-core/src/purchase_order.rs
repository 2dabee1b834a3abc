//! # Purchase Orders
//!
//! Orders placed with suppliers to replenish stock.
//!
//! ## Purchase Order Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  DRAFT ──► SENT ──► CONFIRMED ─ ─ receiving ─ ─► PARTIAL ─ ─► RECEIVED  │
//! │    │         │          │                           │                   │
//! │    └─────────┴──────────┴───────► CANCELLED ◄───────┘                   │
//! │                                                                         │
//! │  PARTIAL and RECEIVED are derived from quantities received; they can   │
//! │  not be requested directly.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Receiving itself lives in [`crate::receiving`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, InvariantViolation};
use crate::line_item::{build_lines, LineItem, LineItemInput, Totals};
use crate::money::TaxRate;
use crate::receiving::ReceivingEvent;
use crate::types::{DocumentKind, LedgerSettings};

// =============================================================================
// Purchase Order Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoStatus {
    Draft,
    Sent,
    Confirmed,
    Partial,
    Received,
    Cancelled,
}

impl PoStatus {
    /// Transitions a caller may request.
    pub fn allowed_transitions(self) -> &'static [PoStatus] {
        use PoStatus::*;
        match self {
            Draft => &[Sent, Cancelled],
            Sent => &[Confirmed, Cancelled],
            Confirmed | Partial => &[Cancelled],
            Received | Cancelled => &[],
        }
    }

    /// Goods may be received against the order.
    pub fn is_receivable(self) -> bool {
        matches!(self, PoStatus::Sent | PoStatus::Confirmed | PoStatus::Partial)
    }

    /// Lines may still change.
    pub fn is_editable(self) -> bool {
        matches!(self, PoStatus::Draft | PoStatus::Sent | PoStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PoStatus::Draft => "DRAFT",
            PoStatus::Sent => "SENT",
            PoStatus::Confirmed => "CONFIRMED",
            PoStatus::Partial => "PARTIAL",
            PoStatus::Received => "RECEIVED",
            PoStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Purchase Order Line
// =============================================================================

/// A line item plus the running total received against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PoLineItem {
    pub line: LineItem,
    /// Never exceeds `line.quantity`.
    pub quantity_received: i64,
}

impl PoLineItem {
    pub fn new(line: LineItem) -> Self {
        PoLineItem {
            line,
            quantity_received: 0,
        }
    }

    /// Units still expected from the supplier.
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.line.quantity - self.quantity_received
    }

    #[inline]
    pub fn is_fully_received(&self) -> bool {
        self.remaining() == 0
    }
}

// =============================================================================
// Purchase Order
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewPurchaseOrder {
    pub supplier_id: String,
    pub lines: Vec<LineItemInput>,
    /// Defaults to today.
    #[ts(as = "Option<String>")]
    pub order_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub expected_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrder {
    pub id: String,
    /// Human-readable number (e.g., "PO-2026-00003")
    pub po_number: String,
    pub supplier_id: String,
    pub lines: Vec<PoLineItem>,
    pub vat_rate: TaxRate,
    pub totals: Totals,
    #[ts(as = "String")]
    pub order_date: NaiveDate,
    #[ts(as = "Option<String>")]
    pub expected_date: Option<NaiveDate>,
    pub status: PoStatus,
    /// Receiving history, oldest first.
    pub receipts: Vec<ReceivingEvent>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl PurchaseOrder {
    pub fn create(
        id: String,
        po_number: String,
        input: NewPurchaseOrder,
        settings: &LedgerSettings,
        now: DateTime<Utc>,
    ) -> CoreResult<PurchaseOrder> {
        let lines = build_lines(input.lines)?;
        let totals = Totals::undiscounted(&lines, settings.vat_rate);

        Ok(PurchaseOrder {
            id,
            po_number,
            supplier_id: input.supplier_id,
            lines: lines.into_iter().map(PoLineItem::new).collect(),
            vat_rate: settings.vat_rate,
            totals,
            order_date: input.order_date.unwrap_or_else(|| now.date_naive()),
            expected_date: input.expected_date,
            status: PoStatus::Draft,
            receipts: Vec::new(),
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    pub fn line(&self, line_id: &str) -> Option<&PoLineItem> {
        self.lines.iter().find(|l| l.line.id == line_id)
    }

    /// Requests a status change. PARTIAL and RECEIVED come only from receiving.
    pub fn transition(&mut self, to: PoStatus, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.status.allowed_transitions().contains(&to) {
            return Err(CoreError::InvalidTransition {
                document: DocumentKind::PurchaseOrder,
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Replaces every line. Only before anything has been received.
    pub fn replace_lines(&mut self, inputs: Vec<LineItemInput>, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.status.is_editable() {
            return Err(self.locked());
        }

        let lines = build_lines(inputs)?;
        self.totals = Totals::undiscounted(&lines, self.vat_rate);
        self.lines = lines.into_iter().map(PoLineItem::new).collect();
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn locked(&self) -> CoreError {
        CoreError::DocumentLocked {
            document: DocumentKind::PurchaseOrder,
            number: self.po_number.clone(),
            status: self.status.to_string(),
        }
    }

    pub fn verify_totals(&self) -> Result<(), InvariantViolation> {
        for po_line in &self.lines {
            if po_line.quantity_received > po_line.line.quantity || po_line.quantity_received < 0 {
                return Err(InvariantViolation::ReceivedExceedsOrdered {
                    line_id: po_line.line.id.clone(),
                    ordered: po_line.line.quantity,
                    received: po_line.quantity_received,
                });
            }
        }
        let recomputed = Totals::undiscounted(self.lines.iter().map(|l| &l.line), self.vat_rate);
        self.totals
            .verify(&recomputed, DocumentKind::PurchaseOrder, &self.po_number)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap()
    }

    fn purchase_order() -> PurchaseOrder {
        let input = NewPurchaseOrder {
            supplier_id: "sup-1".to_string(),
            lines: vec![LineItemInput {
                product_id: Some("prod-1".to_string()),
                description: "Bracket".to_string(),
                sku: Some("BRK-1".to_string()),
                quantity: 50,
                unit_price: Money::from_cents(1_000),
            }],
            order_date: None,
            expected_date: None,
            notes: None,
        };
        PurchaseOrder::create(
            "po-1".to_string(),
            "PO-2026-00001".to_string(),
            input,
            &LedgerSettings::default(),
            now(),
        )
        .unwrap()
    }

    #[test]
    fn test_create() {
        let po = purchase_order();
        assert_eq!(po.status, PoStatus::Draft);
        assert_eq!(po.order_date, now().date_naive());
        assert_eq!(po.totals.subtotal.cents(), 50_000);
        assert_eq!(po.lines[0].remaining(), 50);
        assert!(po.verify_totals().is_ok());
    }

    #[test]
    fn test_requested_transitions() {
        let mut po = purchase_order();
        po.transition(PoStatus::Sent, now()).unwrap();
        assert!(matches!(
            po.transition(PoStatus::Received, now()),
            Err(CoreError::InvalidTransition { .. })
        ));
        assert!(po.transition(PoStatus::Partial, now()).is_err());
        po.transition(PoStatus::Confirmed, now()).unwrap();
        po.transition(PoStatus::Cancelled, now()).unwrap();
        assert!(po.transition(PoStatus::Sent, now()).is_err());
    }

    #[test]
    fn test_lines_locked_after_cancel() {
        let mut po = purchase_order();
        po.transition(PoStatus::Cancelled, now()).unwrap();
        assert!(matches!(
            po.replace_lines(vec![LineItemInput::custom("x", 1, Money::zero())], now()),
            Err(CoreError::DocumentLocked { .. })
        ));
    }
}
