//! # Line Items and Totals
//!
//! Every document (order, quote, invoice, purchase order) is a list of
//! line items plus totals derived from them.
//!
//! ## Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LineItem { quantity, unit_price }                                      │
//! │       │                                                                 │
//! │       ▼  line_total() = quantity × unit_price   (never stored)          │
//! │  subtotal = Σ line_total                                                │
//! │  vat      = subtotal × rate   (round half up at the cent)              │
//! │  total    = subtotal + vat − discount                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Totals are recomputed on every line edit; a caller cannot set them.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreResult, InvariantViolation, ValidationError};
use crate::money::{Money, TaxRate};
use crate::types::{DocumentKind, Product};
use crate::validation::{
    validate_line_count, validate_price_cents, validate_quantity, validate_sku, validate_text,
    ValidationResult,
};

/// Longest accepted line description.
const MAX_DESCRIPTION_LEN: usize = 500;

// =============================================================================
// Line Item
// =============================================================================

/// One priced line on a document.
///
/// `product_id` is `None` for custom items (services, one-off parts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: String,
    pub product_id: Option<String>,
    pub description: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
}

impl LineItem {
    /// Validates `input` and gives it a fresh id.
    pub fn from_input(input: LineItemInput) -> ValidationResult<LineItem> {
        input.validate()?;

        Ok(LineItem {
            id: Uuid::new_v4().to_string(),
            product_id: input.product_id,
            description: input.description.trim().to_string(),
            sku: input
                .sku
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            quantity: input.quantity,
            unit_price: input.unit_price,
        })
    }

    /// Calculates the line total (quantity × unit price).
    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }

    /// Copy of this line with a new id, for documents derived from another.
    pub fn duplicate(&self) -> LineItem {
        LineItem {
            id: Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }

    /// Checks a persisted line total against the recomputation.
    pub fn verify_stored_total(&self, stored: Money) -> Result<(), InvariantViolation> {
        let expected = self.line_total();
        if expected != stored {
            return Err(InvariantViolation::LineTotalMismatch {
                line_id: self.id.clone(),
                expected,
                stored,
            });
        }
        Ok(())
    }
}

/// Caller-supplied line, before validation and id assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LineItemInput {
    pub product_id: Option<String>,
    pub description: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
}

impl LineItemInput {
    /// A line for a catalogue product at its current price.
    pub fn for_product(product: &Product, quantity: i64) -> Self {
        LineItemInput {
            product_id: Some(product.id.clone()),
            description: product.name.clone(),
            sku: Some(product.sku.clone()),
            quantity,
            unit_price: product.unit_price,
        }
    }

    /// A custom line with no product behind it.
    pub fn custom(description: impl Into<String>, quantity: i64, unit_price: Money) -> Self {
        LineItemInput {
            product_id: None,
            description: description.into(),
            sku: None,
            quantity,
            unit_price,
        }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        validate_text("description", &self.description, MAX_DESCRIPTION_LEN)?;
        validate_quantity(self.quantity)?;
        validate_price_cents(self.unit_price.cents())?;
        if let Some(sku) = self.sku.as_deref().filter(|s| !s.trim().is_empty()) {
            validate_sku(sku)?;
        }
        Ok(())
    }
}

/// Validates a full set of lines for a document and assigns ids.
pub fn build_lines(inputs: Vec<LineItemInput>) -> ValidationResult<Vec<LineItem>> {
    validate_line_count(inputs.len())?;
    inputs.into_iter().map(LineItem::from_input).collect()
}

/// Deep copy of `lines` with fresh ids.
pub fn copy_lines(lines: &[LineItem]) -> Vec<LineItem> {
    lines.iter().map(LineItem::duplicate).collect()
}

// =============================================================================
// Totals
// =============================================================================

/// Derived document totals.
///
/// ## Invariant
/// `total = subtotal + vat − discount`, with `0 ≤ discount ≤ subtotal + vat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Money,
    pub vat: Money,
    pub discount: Money,
    pub total: Money,
}

impl Totals {
    /// Computes totals for `lines` at `rate`, less `discount`.
    ///
    /// ## Example
    /// ```rust
    /// use keystone_core::line_item::{LineItem, LineItemInput, Totals};
    /// use keystone_core::money::{Money, TaxRate};
    ///
    /// let line = LineItem::from_input(LineItemInput::custom("Widget", 10, Money::from_cents(10_000))).unwrap();
    /// let totals = Totals::compute([&line], TaxRate::STANDARD_VAT, Money::zero()).unwrap();
    ///
    /// assert_eq!(totals.subtotal.to_string(), "1000.00");
    /// assert_eq!(totals.vat.to_string(), "150.00");
    /// assert_eq!(totals.total.to_string(), "1150.00");
    /// ```
    pub fn compute<'a>(
        lines: impl IntoIterator<Item = &'a LineItem>,
        rate: TaxRate,
        discount: Money,
    ) -> CoreResult<Totals> {
        let subtotal: Money = lines.into_iter().map(LineItem::line_total).sum();
        Totals::from_subtotal(subtotal, rate, discount)
    }

    /// Totals with no discount. Orders and purchase orders never carry one.
    pub fn undiscounted<'a>(lines: impl IntoIterator<Item = &'a LineItem>, rate: TaxRate) -> Totals {
        let subtotal: Money = lines.into_iter().map(LineItem::line_total).sum();
        let vat = subtotal.calculate_tax(rate);
        Totals {
            subtotal,
            vat,
            discount: Money::zero(),
            total: subtotal + vat,
        }
    }

    /// Totals for a known subtotal.
    pub fn from_subtotal(subtotal: Money, rate: TaxRate, discount: Money) -> CoreResult<Totals> {
        let vat = subtotal.calculate_tax(rate);
        let gross = subtotal + vat;

        if discount.is_negative() || discount > gross {
            return Err(ValidationError::OutOfRange {
                field: "discount".to_string(),
                min: 0,
                max: gross.cents(),
            }
            .into());
        }

        Ok(Totals {
            subtotal,
            vat,
            discount,
            total: gross - discount,
        })
    }

    /// Compares persisted totals against a recomputation.
    ///
    /// Returns the first field that disagrees.
    pub fn verify(
        &self,
        recomputed: &Totals,
        document: DocumentKind,
        number: &str,
    ) -> Result<(), InvariantViolation> {
        let fields = [
            ("subtotal", recomputed.subtotal, self.subtotal),
            ("vat", recomputed.vat, self.vat),
            ("discount", recomputed.discount, self.discount),
            ("total", recomputed.total, self.total),
        ];

        for (field, expected, stored) in fields {
            if expected != stored {
                return Err(InvariantViolation::TotalsMismatch {
                    document,
                    number: number.to_string(),
                    field,
                    expected,
                    stored,
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
