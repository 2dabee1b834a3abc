//! # Error Types
//!
//! Domain-specific error types for keystone-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  keystone-core errors (this file)                                      │
//! │  ├── CoreError           - Stable, user-facing engine failures         │
//! │  ├── ValidationError     - Malformed input                             │
//! │  └── InvariantViolation  - Internal derivation bugs (never user input) │
//! │                                                                         │
//! │  keystone-db errors (separate crate)                                   │
//! │  ├── DbError             - Database operation failures                 │
//! │  └── EngineError         - CoreError | DbError, with an ErrorCode      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure is detected before any state is written, so a returned
//! error always means "nothing changed".

use chrono::NaiveDate;
use thiserror::Error;

use crate::money::Money;
use crate::types::DocumentKind;

// =============================================================================
// Core Error
// =============================================================================

/// Engine failures with stable kinds.
///
/// Presentation collaborators translate these into user messages; the
/// engine itself never recovers from them or substitutes a default.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested status change is not in the document's transition table.
    #[error("{document} cannot move from {from} to {to}")]
    InvalidTransition {
        document: DocumentKind,
        from: String,
        to: String,
    },

    /// The document is in a state that freezes its content.
    ///
    /// ## When This Occurs
    /// - Editing lines of a DISPATCHED/DELIVERED/CANCELLED order
    /// - Editing a quote after it was accepted, rejected, expired or converted
    /// - Receiving against a RECEIVED or CANCELLED purchase order
    #[error("{document} {number} is {status} and can no longer be modified")]
    DocumentLocked {
        document: DocumentKind,
        number: String,
        status: String,
    },

    /// Payment amount is zero or negative.
    #[error("Invalid amount {amount}: must be greater than zero")]
    InvalidAmount { amount: Money },

    /// Payment would push amount paid past the invoice total.
    #[error("Payment of {amount} exceeds amount due {amount_due}")]
    OverApplication { amount: Money, amount_due: Money },

    /// Invoice does not accept the operation (cancelled, or already paid into).
    #[error("Invoice {number} is locked: {reason}")]
    InvoiceLocked { number: String, reason: String },

    /// More units received than are still outstanding on the line.
    ///
    /// ## User Workflow
    /// ```text
    /// PO line: ordered 50, received 30
    ///      │
    ///      ▼
    /// Receive 25 ← remaining is only 20
    ///      │
    ///      ▼
    /// OverReceipt { line, received_now: 25, remaining: 20 }
    /// ```
    #[error("Line {line_id}: receiving {received_now} exceeds remaining {remaining}")]
    OverReceipt {
        line_id: String,
        received_now: i64,
        remaining: i64,
    },

    /// Accepted + rejected does not add up to the received quantity.
    #[error(
        "Line {line_id}: accepted {accepted} + rejected {rejected} does not equal received {received_now}"
    )]
    SplitMismatch {
        line_id: String,
        received_now: i64,
        accepted: i64,
        rejected: i64,
    },

    /// A rejection was recorded without saying why.
    #[error("A reason is required for {context}")]
    MissingReason { context: String },

    /// Every receiving line was zero.
    #[error("Receipt contains no received quantities")]
    EmptyReceipt,

    /// The quote's validity date has passed.
    #[error("Quote {number} expired on {valid_until}")]
    QuoteExpired {
        number: String,
        valid_until: NaiveDate,
    },

    /// The quote already produced an order.
    #[error("Quote {number} was already converted to order {order_id}")]
    AlreadyConverted { number: String, order_id: String },

    /// The order already has an invoice.
    #[error("Order {number} is already invoiced by {invoice_id}")]
    AlreadyInvoiced { number: String, invoice_id: String },

    /// The document changed after it was read.
    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: String, id: String },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A derived value disagreed with its source. Always a bug.
    #[error("Internal error: {0}")]
    Internal(#[from] InvariantViolation),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a MissingReason error.
    pub fn missing_reason(context: impl Into<String>) -> Self {
        CoreError::MissingReason {
            context: context.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid amount).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., the same PO line twice in one receipt).
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },

    /// Customer credit limit would be exceeded.
    #[error("Credit limit {limit} exceeded: {requested} requested with {outstanding} outstanding")]
    CreditLimitExceeded {
        limit: Money,
        outstanding: Money,
        requested: Money,
    },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

// =============================================================================
// Invariant Violation
// =============================================================================

/// A derived value disagrees with the facts it is derived from.
///
/// These are not user errors. Debug builds trip a `debug_assert!` where
/// they are detected; release builds surface them as `CoreError::Internal`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("line {line_id}: stored total {stored} != quantity × unit price {expected}")]
    LineTotalMismatch {
        line_id: String,
        expected: Money,
        stored: Money,
    },

    #[error("{document} {number}: stored {field} {stored} != recomputed {expected}")]
    TotalsMismatch {
        document: DocumentKind,
        number: String,
        field: &'static str,
        expected: Money,
        stored: Money,
    },

    #[error("purchase order line {line_id}: received {received} exceeds ordered {ordered}")]
    ReceivedExceedsOrdered {
        line_id: String,
        ordered: i64,
        received: i64,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::OverApplication {
            amount: Money::from_cents(100),
            amount_due: Money::zero(),
        };
        assert_eq!(err.to_string(), "Payment of 1.00 exceeds amount due 0.00");

        let err = CoreError::InvalidTransition {
            document: DocumentKind::Order,
            from: "DISPATCHED".to_string(),
            to: "PROCESSING".to_string(),
        };
        assert_eq!(err.to_string(), "Order cannot move from DISPATCHED to PROCESSING");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("customer_id").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.to_string(), "Validation error: customer_id is required");
    }

    #[test]
    fn test_invariant_violation_is_internal() {
        let violation = InvariantViolation::LineTotalMismatch {
            line_id: "l-1".to_string(),
            expected: Money::from_cents(1000),
            stored: Money::from_cents(999),
        };
        let core_err: CoreError = violation.into();
        assert!(matches!(core_err, CoreError::Internal(_)));
    }
}
