//! # Validation Module
//!
//! Input validation utilities for document operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (HTTP handler, admin screen)                          │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: keystone-core                                                │
//! │  ├── THIS MODULE: field rules                                          │
//! │  └── Document methods: transition tables, reconciliation rules         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE constraints (document numbers, one invoice per order)      │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use keystone_core::validation::{validate_sku, validate_quantity};
//!
//! validate_sku("WIDGET-10").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::{MAX_DOCUMENT_LINES, MAX_LINE_QUANTITY, MAX_UNIT_PRICE_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ## Example
/// ```rust
/// use keystone_core::validation::validate_sku;
///
/// assert!(validate_sku("WIDGET-10").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("A".repeat(100).as_str()).is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::required("sku"));
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a required free-text field such as a name or line description.
pub fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates an email address (shape only, no deliverability).
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let email = email.trim();
    validate_text("email", email, 254)?;

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::InvalidFormat {
            field: "email".to_string(),
            reason: "must look like name@domain.tld".to_string(),
        }),
    }
}

/// Checks that a rejection or cancellation reason was given.
///
/// ## Returns
/// The trimmed reason.
pub fn validate_reason(reason: Option<&str>, context: &str) -> CoreResult<String> {
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => Ok(r.to_string()),
        _ => Err(CoreError::missing_reason(context)),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line-item quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a unit price in cents.
///
/// ## Rules
/// - Must be non-negative (>= 0)
/// - Zero is allowed (free items)
/// - Must not exceed MAX_UNIT_PRICE_CENTS
///
/// ## Example
/// ```rust
/// use keystone_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents(1099).is_ok());
/// assert!(validate_price_cents(0).is_ok());
/// assert!(validate_price_cents(-100).is_err());
/// ```
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_UNIT_PRICE_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: "unit price".to_string(),
            min: 0,
            max: MAX_UNIT_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Validates a tax rate in basis points (0% to 100%).
pub fn validate_tax_rate_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10000 {
        return Err(ValidationError::OutOfRange {
            field: "vat_rate".to_string(),
            min: 0,
            max: 10000,
        });
    }

    Ok(())
}

/// Validates payment terms in days (0 = due on issue, at most a year).
pub fn validate_payment_terms(days: u32) -> ValidationResult<()> {
    if days > 365 {
        return Err(ValidationError::OutOfRange {
            field: "payment_terms_days".to_string(),
            min: 0,
            max: 365,
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates the number of lines on a document.
///
/// ## Rules
/// - At least one line
/// - No more than MAX_DOCUMENT_LINES
pub fn validate_line_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::required("line items"));
    }

    if count > MAX_DOCUMENT_LINES {
        return Err(ValidationError::OutOfRange {
            field: "line items".to_string(),
            min: 1,
            max: MAX_DOCUMENT_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("WIDGET-10").is_ok());
        assert!(validate_sku("ABC123").is_ok());
        assert!(validate_sku("bolt_m8").is_ok());

        assert!(validate_sku("").is_err());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_text() {
        assert!(validate_text("description", "Steel bracket", 200).is_ok());
        assert!(validate_text("description", "  ", 200).is_err());
        assert!(validate_text("description", &"x".repeat(201), 200).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("buyer@acme.co.za").is_ok());
        assert!(validate_email("buyer@localhost").is_err());
        assert!(validate_email("@acme.com").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn test_validate_reason() {
        assert_eq!(validate_reason(Some("  damaged "), "rejection").unwrap(), "damaged");
        assert!(matches!(
            validate_reason(Some("   "), "rejection"),
            Err(CoreError::MissingReason { .. })
        ));
        assert!(matches!(
            validate_reason(None, "rejection"),
            Err(CoreError::MissingReason { .. })
        ));
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_LINE_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_price_cents() {
        assert!(validate_price_cents(0).is_ok());
        assert!(validate_price_cents(MAX_UNIT_PRICE_CENTS).is_ok());
        assert!(validate_price_cents(-1).is_err());
        assert!(validate_price_cents(MAX_UNIT_PRICE_CENTS + 1).is_err());
    }

    #[test]
    fn test_validate_line_count() {
        assert!(validate_line_count(0).is_err());
        assert!(validate_line_count(1).is_ok());
        assert!(validate_line_count(MAX_DOCUMENT_LINES + 1).is_err());
    }

    #[test]
    fn test_validate_rates_and_terms() {
        assert!(validate_tax_rate_bps(1500).is_ok());
        assert!(validate_tax_rate_bps(10001).is_err());
        assert!(validate_payment_terms(30).is_ok());
        assert!(validate_payment_terms(400).is_err());
    }
}
