//! # Orders
//!
//! Customer orders and their fulfilment state machine.
//!
//! ## Order Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PENDING ─► CONFIRMED ─► AWAITING_PAYMENT ─► PAYMENT_RECEIVED           │
//! │                                                     │                   │
//! │                                                     ▼                   │
//! │        DELIVERED ◄── DISPATCHED ◄── READY_FOR_DISPATCH ◄── PROCESSING   │
//! │                                                                         │
//! │  Any state before DISPATCHED ──► CANCELLED                              │
//! │  Any state before DISPATCHED ──► ON_HOLD ──► (the state it came from)   │
//! │                                                                         │
//! │  DISPATCHED / DELIVERED / CANCELLED: lines, totals, delivery and POP    │
//! │  are frozen.                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, InvariantViolation, ValidationError};
use crate::line_item::{build_lines, LineItem, LineItemInput, Totals};
use crate::money::{Money, TaxRate};
use crate::types::{Address, Customer, DocumentKind, LedgerSettings, PaymentMethod, Priority};
use crate::validation::{validate_reason, validate_text};

// =============================================================================
// Order Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    AwaitingPayment,
    PaymentReceived,
    Processing,
    ReadyForDispatch,
    Dispatched,
    Delivered,
    Cancelled,
    OnHold,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::AwaitingPayment,
        OrderStatus::PaymentReceived,
        OrderStatus::Processing,
        OrderStatus::ReadyForDispatch,
        OrderStatus::Dispatched,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::OnHold,
    ];

    /// The transition table.
    ///
    /// ON_HOLD lists every state an order can be held from; [`Order::transition`]
    /// narrows that to the one it was actually held from.
    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled, OnHold],
            Confirmed => &[AwaitingPayment, Cancelled, OnHold],
            AwaitingPayment => &[PaymentReceived, Cancelled, OnHold],
            PaymentReceived => &[Processing, Cancelled, OnHold],
            Processing => &[ReadyForDispatch, Cancelled, OnHold],
            ReadyForDispatch => &[Dispatched, Cancelled, OnHold],
            Dispatched => &[Delivered],
            Delivered | Cancelled => &[],
            OnHold => &[
                Pending,
                Confirmed,
                AwaitingPayment,
                PaymentReceived,
                Processing,
                ReadyForDispatch,
                Cancelled,
            ],
        }
    }

    /// Lines, totals, delivery details and proof of payment are frozen.
    pub fn is_locked(self) -> bool {
        matches!(
            self,
            OrderStatus::Dispatched | OrderStatus::Delivered | OrderStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            OrderStatus::PaymentReceived => "PAYMENT_RECEIVED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::ReadyForDispatch => "READY_FOR_DISPATCH",
            OrderStatus::Dispatched => "DISPATCHED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::OnHold => "ON_HOLD",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "order status".to_string(),
                reason: format!("unknown status '{}'", s),
            })
    }
}

// =============================================================================
// Payment Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Partial,
    Paid,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Partial => "PARTIAL",
            PaymentStatus::Paid => "PAID",
        })
    }
}

// =============================================================================
// Proof of Payment
// =============================================================================

/// Bank-transfer proof uploaded by the customer and checked by an admin.
///
/// A rejected proof keeps the reason but loses its file, so the order
/// waits for a new upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProofOfPayment {
    /// Opaque handle to the stored file (path, object key).
    pub file_handle: Option<String>,
    #[ts(as = "Option<String>")]
    pub uploaded_at: Option<DateTime<Utc>>,
    pub verified: bool,
    #[ts(as = "Option<String>")]
    pub verified_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl ProofOfPayment {
    /// A file is attached and not yet verified.
    pub fn is_awaiting_review(&self) -> bool {
        self.file_handle.is_some() && !self.verified
    }
}

// =============================================================================
// Order
// =============================================================================

/// Input for a new order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer_id: String,
    pub lines: Vec<LineItemInput>,
    pub payment_method: PaymentMethod,
    /// Falls back to the customer's default address when `None`.
    pub delivery_address: Option<Address>,
    pub priority: Priority,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    /// Human-readable number (e.g., "ORD-2026-00001")
    pub order_number: String,
    pub customer_id: String,
    pub lines: Vec<LineItem>,
    pub vat_rate: TaxRate,
    /// Always carries a zero discount.
    pub totals: Totals,
    pub status: OrderStatus,
    /// The state an ON_HOLD order resumes to.
    pub held_from: Option<OrderStatus>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub proof_of_payment: Option<ProofOfPayment>,
    pub delivery_address: Option<Address>,
    pub priority: Priority,
    pub source_quote_id: Option<String>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Order {
    /// Creates a PENDING order from validated lines.
    pub fn new(
        id: String,
        order_number: String,
        customer_id: String,
        lines: Vec<LineItem>,
        settings: &LedgerSettings,
        now: DateTime<Utc>,
    ) -> CoreResult<Order> {
        let totals = Totals::undiscounted(&lines, settings.vat_rate);

        Ok(Order {
            id,
            order_number,
            customer_id,
            lines,
            vat_rate: settings.vat_rate,
            totals,
            status: OrderStatus::Pending,
            held_from: None,
            payment_method: PaymentMethod::default(),
            payment_status: PaymentStatus::Unpaid,
            proof_of_payment: None,
            delivery_address: None,
            priority: Priority::default(),
            source_quote_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    /// Builds an order from caller input.
    ///
    /// `customer` has already been loaded; an absent default address is fine.
    pub fn create(
        id: String,
        order_number: String,
        input: NewOrder,
        customer: &Customer,
        settings: &LedgerSettings,
        now: DateTime<Utc>,
    ) -> CoreResult<Order> {
        let lines = build_lines(input.lines)?;
        let mut order = Order::new(id, order_number, customer.id.clone(), lines, settings, now)?;

        order.payment_method = input.payment_method;
        order.delivery_address = input
            .delivery_address
            .or_else(|| customer.default_address.clone());
        order.priority = input.priority;
        order.notes = input.notes.filter(|n| !n.trim().is_empty());
        Ok(order)
    }

    /// Counts towards revenue: paid or delivered, and not cancelled.
    pub fn is_revenue(&self) -> bool {
        self.status != OrderStatus::Cancelled
            && (self.payment_status == PaymentStatus::Paid
                || self.status == OrderStatus::Delivered)
    }

    /// Fails with `DocumentLocked` once the order is dispatched, delivered or cancelled.
    pub fn ensure_editable(&self) -> CoreResult<()> {
        if self.status.is_locked() {
            return Err(CoreError::DocumentLocked {
                document: DocumentKind::Order,
                number: self.order_number.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// Moves the order to `to` if the transition table allows it.
    ///
    /// ## Hold and Resume
    /// Entering ON_HOLD remembers the current state in `held_from`; an
    /// ON_HOLD order may only return there or be cancelled.
    pub fn transition(&mut self, to: OrderStatus, now: DateTime<Utc>) -> CoreResult<()> {
        let allowed = match self.status {
            OrderStatus::OnHold => to == OrderStatus::Cancelled || Some(to) == self.held_from,
            from => from.allowed_transitions().contains(&to),
        };

        if !allowed {
            return Err(CoreError::InvalidTransition {
                document: DocumentKind::Order,
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        self.held_from = match to {
            OrderStatus::OnHold => Some(self.status),
            _ => None,
        };
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Replaces every line and recomputes totals.
    pub fn replace_lines(&mut self, inputs: Vec<LineItemInput>, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        let lines = build_lines(inputs)?;
        self.totals = Totals::undiscounted(&lines, self.vat_rate);
        self.lines = lines;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_delivery_address(&mut self, address: Address, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        validate_text("address line 1", &address.line1, 200)?;
        validate_text("city", &address.city, 100)?;
        self.delivery_address = Some(address);
        self.updated_at = now;
        Ok(())
    }

    /// Checks that a credit-account order fits the customer's credit limit.
    ///
    /// `outstanding` is the unpaid total of the customer's other
    /// credit-account orders.
    pub fn check_credit(&self, customer: &Customer, outstanding: Money) -> CoreResult<()> {
        if self.payment_method != PaymentMethod::CreditAccount {
            return Ok(());
        }
        if let Some(limit) = customer.credit_limit {
            if outstanding + self.totals.total > limit {
                return Err(ValidationError::CreditLimitExceeded {
                    limit,
                    outstanding,
                    requested: self.totals.total,
                }
                .into());
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Proof of payment
    // -------------------------------------------------------------------------

    /// Attaches a proof of payment, replacing any rejected one.
    pub fn upload_pop(&mut self, file_handle: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        validate_text("proof of payment file", file_handle, 500)?;

        if self.proof_of_payment.as_ref().is_some_and(|p| p.verified) {
            return Err(ValidationError::InvalidFormat {
                field: "proof of payment".to_string(),
                reason: "already verified".to_string(),
            }
            .into());
        }

        self.proof_of_payment = Some(ProofOfPayment {
            file_handle: Some(file_handle.trim().to_string()),
            uploaded_at: Some(now),
            verified: false,
            verified_at: None,
            rejection_reason: None,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Marks the proof verified and the order paid.
    ///
    /// An AWAITING_PAYMENT order moves on to PAYMENT_RECEIVED.
    pub fn approve_pop(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        let pop = self.pop_under_review()?;

        pop.verified = true;
        pop.verified_at = Some(now);
        pop.rejection_reason = None;
        self.payment_status = PaymentStatus::Paid;
        self.updated_at = now;

        if self.status == OrderStatus::AwaitingPayment {
            self.transition(OrderStatus::PaymentReceived, now)?;
        }
        Ok(())
    }

    /// Rejects the proof; the file is cleared and the reason kept.
    pub fn reject_pop(&mut self, reason: &str, now: DateTime<Utc>) -> CoreResult<()> {
        let reason = validate_reason(Some(reason), "proof of payment rejection")?;
        self.ensure_editable()?;
        let pop = self.pop_under_review()?;

        pop.file_handle = None;
        pop.uploaded_at = None;
        pop.verified = false;
        pop.verified_at = None;
        pop.rejection_reason = Some(reason);
        self.updated_at = now;
        Ok(())
    }

    fn pop_under_review(&mut self) -> CoreResult<&mut ProofOfPayment> {
        match self.proof_of_payment.as_mut() {
            Some(pop) if pop.is_awaiting_review() => Ok(pop),
            Some(pop) if pop.verified => Err(ValidationError::InvalidFormat {
                field: "proof of payment".to_string(),
                reason: "already verified".to_string(),
            }
            .into()),
            _ => Err(ValidationError::required("proof of payment").into()),
        }
    }

    /// Mirrors the payment state of this order's invoice.
    pub fn follow_invoice_payment(&mut self, amount_due: Money, now: DateTime<Utc>) {
        self.payment_status = if amount_due.is_zero() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Partial
        };
        self.updated_at = now;
    }

    /// Recomputes line and document totals against the stored ones.
    pub fn verify_totals(&self) -> Result<(), InvariantViolation> {
        let recomputed = Totals::undiscounted(&self.lines, self.vat_rate);
        self.totals
            .verify(&recomputed, DocumentKind::Order, &self.order_number)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
