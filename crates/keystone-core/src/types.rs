//! # Domain Types
//!
//! Reference entities and small shared enums used by every document.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Reference Entities                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Customer     │   │    Supplier     │   │    Product      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  payment_terms  │   │  name, contact  │   │  sku, price     │       │
//! │  │  credit_limit   │   │                 │   │  stock_quantity │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │         read by the engine                    stock mutated only by    │
//! │                                               purchase order receiving │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every document has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business number: (`ORD-2026-00001`, `INV-2026-00042`) - human-readable

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::{Money, TaxRate};
use crate::{DEFAULT_PAYMENT_TERMS_DAYS, DEFAULT_VAT_RATE_BPS};

// =============================================================================
// Document Kind
// =============================================================================

/// The four document types the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    Order,
    Quote,
    Invoice,
    PurchaseOrder,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DocumentKind::Order => "Order",
            DocumentKind::Quote => "Quote",
            DocumentKind::Invoice => "Invoice",
            DocumentKind::PurchaseOrder => "Purchase order",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// How an order is settled or an invoice payment arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// EFT; settled through a proof of payment upload.
    #[default]
    BankTransfer,
    Card,
    Cash,
    /// Customer account, bounded by the customer's credit limit.
    CreditAccount,
    Cheque,
    Other,
}

// =============================================================================
// Priority
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

// =============================================================================
// Snapshots
// =============================================================================

/// Delivery address frozen onto an order at creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// Contact details of a prospect who has no customer account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ContactSnapshot {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
}

// =============================================================================
// Customer
// =============================================================================

/// A customer account.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    /// Days between invoice issue and due date. `None` uses the ledger default.
    pub payment_terms_days: Option<u32>,
    /// Upper bound on outstanding credit-account balance.
    pub credit_limit: Option<Money>,
    pub default_address: Option<Address>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Payment terms for this customer, falling back to `default_days`.
    pub fn payment_terms_or(&self, default_days: u32) -> u32 {
        self.payment_terms_days.unwrap_or(default_days)
    }
}

// =============================================================================
// Supplier
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Product
// =============================================================================

/// A product that can appear on documents and be restocked.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    /// Units on hand. Incremented by accepted receiving quantities.
    pub stock_quantity: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

// =============================================================================
// Ledger Settings
// =============================================================================

/// The pure subset of configuration the engine needs.
///
/// Loaded by keystone-db from config file and environment, then passed
/// into every document constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// VAT applied to document subtotals.
    pub vat_rate: TaxRate,
    /// Payment terms used when a customer has none.
    pub default_payment_terms_days: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            vat_rate: TaxRate::from_bps(DEFAULT_VAT_RATE_BPS),
            default_payment_terms_days: DEFAULT_PAYMENT_TERMS_DAYS,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(terms: Option<u32>) -> Customer {
        Customer {
            id: "c-1".to_string(),
            name: "Acme".to_string(),
            email: "buyer@acme.test".to_string(),
            phone: None,
            company: None,
            payment_terms_days: terms,
            credit_limit: None,
            default_address: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_payment_terms_fallback() {
        assert_eq!(customer(None).payment_terms_or(30), 30);
        assert_eq!(customer(Some(7)).payment_terms_or(30), 7);
    }

    #[test]
    fn test_ledger_settings_default() {
        let settings = LedgerSettings::default();
        assert_eq!(settings.vat_rate.bps(), 1500);
        assert_eq!(settings.default_payment_terms_days, 30);
    }

    #[test]
    fn test_document_kind_display() {
        assert_eq!(DocumentKind::PurchaseOrder.to_string(), "Purchase order");
        assert_eq!(
            serde_json::to_string(&DocumentKind::PurchaseOrder).unwrap(),
            "\"PURCHASE_ORDER\""
        );
    }
}
