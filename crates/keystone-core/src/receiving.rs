//! # Receiving
//!
//! Recording physical deliveries against a purchase order.
//!
//! ## Receiving Workflow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PO line: ordered 50                                                    │
//! │                                                                         │
//! │  Delivery 1: received 30 = accepted 28 + rejected 2 ("damaged")         │
//! │     line received 30, PO → PARTIAL, stock +28                           │
//! │                                                                         │
//! │  Delivery 2: received 20 = accepted 20 + rejected 0                     │
//! │     line received 50, PO → RECEIVED, stock +20                          │
//! │                                                                         │
//! │  Rejected units count against the line but never enter stock.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every receiving line is validated before anything changes; a failed
//! receipt leaves the purchase order exactly as it was.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::purchase_order::{PoStatus, PurchaseOrder};
use crate::types::DocumentKind;

// =============================================================================
// Receiving Line
// =============================================================================

/// What arrived for one purchase order line in one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReceivingLine {
    pub po_line_item_id: String,
    pub quantity_received_now: i64,
    pub quantity_accepted: i64,
    pub quantity_rejected: i64,
    /// Required when anything was rejected.
    pub rejection_reason: Option<String>,
}

impl ReceivingLine {
    /// Everything received is accepted.
    pub fn accept_all(po_line_item_id: impl Into<String>, quantity: i64) -> Self {
        ReceivingLine {
            po_line_item_id: po_line_item_id.into(),
            quantity_received_now: quantity,
            quantity_accepted: quantity,
            quantity_rejected: 0,
            rejection_reason: None,
        }
    }

    /// Splits a delivery into accepted and rejected units.
    pub fn split(
        po_line_item_id: impl Into<String>,
        accepted: i64,
        rejected: i64,
        reason: Option<&str>,
    ) -> Self {
        ReceivingLine {
            po_line_item_id: po_line_item_id.into(),
            quantity_received_now: accepted + rejected,
            quantity_accepted: accepted,
            quantity_rejected: rejected,
            rejection_reason: reason.map(str::to_string),
        }
    }

    fn reason(&self) -> Option<&str> {
        self.rejection_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

// =============================================================================
// Receiving Event and Stock Movement
// =============================================================================

/// Append-only audit record of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReceivingEvent {
    pub id: String,
    pub purchase_order_id: String,
    pub lines: Vec<ReceivingLine>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub received_at: DateTime<Utc>,
}

/// Stock delta for one product, derived from a receiving event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub product_id: String,
    /// Accepted units; always positive.
    pub quantity: i64,
    pub receiving_event_id: String,
}

/// Everything a successful receipt produced.
#[derive(Debug, Clone)]
pub struct ReceiptOutcome {
    pub event: ReceivingEvent,
    pub movements: Vec<StockMovement>,
    pub previous_status: PoStatus,
}

// =============================================================================
// Receiving
// =============================================================================

impl PurchaseOrder {
    /// Records a delivery.
    ///
    /// ## Errors
    /// - PO in DRAFT: `InvalidTransition`; RECEIVED or CANCELLED: `DocumentLocked`
    /// - Unknown line: `NotFound`; the same line twice: validation error
    /// - Per line, in order: `SplitMismatch`, `MissingReason`, `OverReceipt`
    /// - Nothing received at all: `EmptyReceipt`
    pub fn receive(
        &mut self,
        event_id: String,
        lines: Vec<ReceivingLine>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<ReceiptOutcome> {
        self.ensure_receivable()?;
        self.validate_receipt(&lines)?;

        let previous_status = self.status;
        let mut movements = Vec::new();

        for receiving in &lines {
            let Some(po_line) = self
                .lines
                .iter_mut()
                .find(|l| l.line.id == receiving.po_line_item_id)
            else {
                continue;
            };

            po_line.quantity_received += receiving.quantity_received_now;
            debug_assert!(po_line.quantity_received <= po_line.line.quantity);

            if receiving.quantity_accepted > 0 {
                if let Some(product_id) = &po_line.line.product_id {
                    movements.push(StockMovement {
                        product_id: product_id.clone(),
                        quantity: receiving.quantity_accepted,
                        receiving_event_id: event_id.clone(),
                    });
                }
            }
        }

        self.status = if self.lines.iter().all(|l| l.is_fully_received()) {
            PoStatus::Received
        } else {
            PoStatus::Partial
        };

        let event = ReceivingEvent {
            id: event_id,
            purchase_order_id: self.id.clone(),
            lines,
            notes: notes.filter(|n| !n.trim().is_empty()),
            received_at: now,
        };
        self.receipts.push(event.clone());
        self.updated_at = now;

        Ok(ReceiptOutcome {
            event,
            movements,
            previous_status,
        })
    }

    /// Receiving lines that accept everything still outstanding.
    pub fn remaining_lines(&self) -> Vec<ReceivingLine> {
        self.lines
            .iter()
            .filter(|l| l.remaining() > 0)
            .map(|l| ReceivingLine::accept_all(l.line.id.clone(), l.remaining()))
            .collect()
    }

    /// Receives all outstanding quantities as accepted.
    pub fn receive_all_remaining(
        &mut self,
        event_id: String,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<ReceiptOutcome> {
        self.ensure_receivable()?;
        let lines = self.remaining_lines();
        self.receive(event_id, lines, notes, now)
    }

    fn ensure_receivable(&self) -> CoreResult<()> {
        match self.status {
            status if status.is_receivable() => Ok(()),
            PoStatus::Draft => Err(CoreError::InvalidTransition {
                document: DocumentKind::PurchaseOrder,
                from: PoStatus::Draft.to_string(),
                to: PoStatus::Partial.to_string(),
            }),
            _ => Err(self.locked()),
        }
    }

    fn validate_receipt(&self, lines: &[ReceivingLine]) -> CoreResult<()> {
        let mut seen = HashSet::new();

        for receiving in lines {
            let id = receiving.po_line_item_id.as_str();
            let po_line = self
                .line(id)
                .ok_or_else(|| CoreError::not_found("purchase order line", id))?;

            if !seen.insert(id) {
                return Err(ValidationError::Duplicate {
                    field: "po_line_item_id".to_string(),
                    value: id.to_string(),
                }
                .into());
            }

            for (field, value) in [
                ("quantity_received_now", receiving.quantity_received_now),
                ("quantity_accepted", receiving.quantity_accepted),
                ("quantity_rejected", receiving.quantity_rejected),
            ] {
                if value < 0 {
                    return Err(ValidationError::OutOfRange {
                        field: field.to_string(),
                        min: 0,
                        max: po_line.line.quantity,
                    }
                    .into());
                }
            }

            let split = receiving
                .quantity_accepted
                .checked_add(receiving.quantity_rejected);
            if split != Some(receiving.quantity_received_now) {
                return Err(CoreError::SplitMismatch {
                    line_id: id.to_string(),
                    received_now: receiving.quantity_received_now,
                    accepted: receiving.quantity_accepted,
                    rejected: receiving.quantity_rejected,
                });
            }

            if receiving.quantity_rejected > 0 && receiving.reason().is_none() {
                return Err(CoreError::missing_reason(format!(
                    "rejecting {} units on line {}",
                    receiving.quantity_rejected, id
                )));
            }

            if receiving.quantity_received_now > po_line.remaining() {
                return Err(CoreError::OverReceipt {
                    line_id: id.to_string(),
                    received_now: receiving.quantity_received_now,
                    remaining: po_line.remaining(),
                });
            }
        }

        if lines.iter().all(|l| l.quantity_received_now == 0) {
            return Err(CoreError::EmptyReceipt);
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::LineItemInput;
    use crate::money::Money;
    use crate::purchase_order::NewPurchaseOrder;
    use crate::types::LedgerSettings;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap()
    }

    /// A SENT purchase order: 50 brackets (product-backed) and 5 hours of a custom service.
    fn sent_po() -> PurchaseOrder {
        let input = NewPurchaseOrder {
            supplier_id: "sup-1".to_string(),
            lines: vec![
                LineItemInput {
                    product_id: Some("prod-1".to_string()),
                    description: "Bracket".to_string(),
                    sku: Some("BRK-1".to_string()),
                    quantity: 50,
                    unit_price: Money::from_cents(1_000),
                },
                LineItemInput::custom("Fitting service", 5, Money::from_cents(30_000)),
            ],
            order_date: None,
            expected_date: None,
            notes: None,
        };
        let mut po = PurchaseOrder::create(
            "po-1".to_string(),
            "PO-2026-00001".to_string(),
            input,
            &LedgerSettings::default(),
            now(),
        )
        .unwrap();
        po.transition(PoStatus::Sent, now()).unwrap();
        po
    }

    fn bracket_line(po: &PurchaseOrder) -> String {
        po.lines[0].line.id.clone()
    }

    #[test]
    fn test_partial_then_complete_receipt() {
        let mut po = sent_po();
        let bracket = bracket_line(&po);
        let service = po.lines[1].line.id.clone();

        let first = po
            .receive(
                "ev-1".to_string(),
                vec![ReceivingLine::split(&bracket, 28, 2, Some("damaged"))],
                None,
                now(),
            )
            .unwrap();

        assert_eq!(po.lines[0].quantity_received, 30);
        assert_eq!(po.status, PoStatus::Partial);
        assert_eq!(first.previous_status, PoStatus::Sent);
        assert_eq!(
            first.movements,
            vec![StockMovement {
                product_id: "prod-1".to_string(),
                quantity: 28,
                receiving_event_id: "ev-1".to_string(),
            }]
        );

        let second = po
            .receive(
                "ev-2".to_string(),
                vec![
                    ReceivingLine::accept_all(&bracket, 20),
                    ReceivingLine::accept_all(&service, 5),
                ],
                Some("final delivery".to_string()),
                now(),
            )
            .unwrap();

        assert_eq!(po.lines[0].quantity_received, 50);
        assert_eq!(po.status, PoStatus::Received);
        // custom lines never move stock
        assert_eq!(second.movements.len(), 1);
        assert_eq!(second.movements[0].quantity, 20);
        assert_eq!(po.receipts.len(), 2);
        assert!(po.verify_totals().is_ok());
    }

    #[test]
    fn test_split_mismatch_leaves_po_unchanged() {
        let mut po = sent_po();
        let before = po.clone();
        let line = ReceivingLine {
            po_line_item_id: bracket_line(&po),
            quantity_received_now: 10,
            quantity_accepted: 7,
            quantity_rejected: 2,
            rejection_reason: Some("scratched".to_string()),
        };

        let err = po.receive("ev-1".to_string(), vec![line], None, now()).unwrap_err();
        assert!(matches!(err, CoreError::SplitMismatch { .. }));
        assert_eq!(
            serde_json::to_string(&po).unwrap(),
            serde_json::to_string(&before).unwrap()
        );
    }

    #[test]
    fn test_split_overflow_is_mismatch() {
        let mut po = sent_po();
        let line = ReceivingLine {
            po_line_item_id: bracket_line(&po),
            quantity_received_now: 3,
            quantity_accepted: i64::MAX,
            quantity_rejected: 1,
            rejection_reason: Some("crushed".to_string()),
        };

        let err = po.receive("ev-1".to_string(), vec![line], None, now()).unwrap_err();
        assert!(matches!(err, CoreError::SplitMismatch { .. }));
        assert_eq!(po.lines[0].quantity_received, 0);
        assert!(po.receipts.is_empty());
    }

    #[test]
    fn test_rejection_needs_reason() {
        let mut po = sent_po();
        let line = ReceivingLine::split(bracket_line(&po), 8, 2, Some("   "));
        assert!(matches!(
            po.receive("ev-1".to_string(), vec![line], None, now()),
            Err(CoreError::MissingReason { .. })
        ));
    }

    #[test]
    fn test_over_receipt() {
        let mut po = sent_po();
        let bracket = bracket_line(&po);
        po.receive("ev-1".to_string(), vec![ReceivingLine::accept_all(&bracket, 30)], None, now())
            .unwrap();

        let err = po
            .receive("ev-2".to_string(), vec![ReceivingLine::accept_all(&bracket, 25)], None, now())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::OverReceipt { received_now: 25, remaining: 20, .. }
        ));
        assert_eq!(po.lines[0].quantity_received, 30);
    }

    #[test]
    fn test_empty_and_unknown_lines() {
        let mut po = sent_po();
        let bracket = bracket_line(&po);

        assert!(matches!(
            po.receive("ev".to_string(), vec![ReceivingLine::accept_all(&bracket, 0)], None, now()),
            Err(CoreError::EmptyReceipt)
        ));
        assert!(matches!(
            po.receive("ev".to_string(), vec![], None, now()),
            Err(CoreError::EmptyReceipt)
        ));
        assert!(matches!(
            po.receive("ev".to_string(), vec![ReceivingLine::accept_all("nope", 1)], None, now()),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            po.receive(
                "ev".to_string(),
                vec![
                    ReceivingLine::accept_all(&bracket, 1),
                    ReceivingLine::accept_all(&bracket, 1)
                ],
                None,
                now()
            ),
            Err(CoreError::Validation(ValidationError::Duplicate { .. }))
        ));
    }

    #[test]
    fn test_state_guards() {
        let mut draft = sent_po();
        draft.status = PoStatus::Draft;
        let bracket = bracket_line(&draft);
        assert!(matches!(
            draft.receive("ev".to_string(), vec![ReceivingLine::accept_all(&bracket, 1)], None, now()),
            Err(CoreError::InvalidTransition { .. })
        ));

        let mut cancelled = sent_po();
        cancelled.transition(PoStatus::Cancelled, now()).unwrap();
        assert!(matches!(
            cancelled.receive_all_remaining("ev".to_string(), None, now()),
            Err(CoreError::DocumentLocked { .. })
        ));
    }

    #[test]
    fn test_receive_all_remaining() {
        let mut po = sent_po();
        let bracket = bracket_line(&po);
        po.receive(
            "ev-1".to_string(),
            vec![ReceivingLine::split(&bracket, 28, 2, Some("damaged"))],
            None,
            now(),
        )
        .unwrap();

        let outcome = po.receive_all_remaining("ev-2".to_string(), None, now()).unwrap();
        assert_eq!(po.status, PoStatus::Received);
        assert_eq!(outcome.event.lines.len(), 2);
        assert_eq!(outcome.movements[0].quantity, 20);

        assert!(matches!(
            po.receive_all_remaining("ev-3".to_string(), None, now()),
            Err(CoreError::DocumentLocked { .. })
        ));
    }
}
