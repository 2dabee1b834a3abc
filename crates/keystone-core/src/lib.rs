//! # keystone-core: Document Lifecycle Engine
//!
//! This crate is the **heart** of Keystone. It contains the document state
//! machines and reconciliation rules as pure functions with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Keystone Back-Office                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │     Collaborators (admin UI, storefront, mailer, assistant)     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ BackOffice / Lookup                    │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            keystone-db (transactions, repositories)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ load → validate → write                │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ keystone-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   money   │  │ line_item │  │  order    │  │ invoice   │  │   │
//! │  │   │  Money    │  │ LineItem  │  │  quote    │  │ payments  │  │   │
//! │  │   │  TaxRate  │  │  Totals   │  │  po       │  │ receiving │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO WALL CLOCK • PURE FUNCTIONS        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type with integer arithmetic, VAT
//! - [`line_item`] - Line items and document totals
//! - [`order`], [`quote`], [`invoice`], [`purchase_order`] - Documents and their transition tables
//! - [`receiving`] - Purchase order receipts and stock movements
//! - [`conversion`] - Quote → Order and Order → Invoice
//! - [`report`] - Sales report aggregation
//! - [`clock`] - Injected time source
//! - [`error`] - Domain error types
//! - [`validation`] - Field rules
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same documents + same clock = same result
//! 2. **No I/O**: persistence lives in keystone-db
//! 3. **Integer Money**: all monetary values are in cents (i64)
//! 4. **Validate, then mutate**: a method that returns `Err` has changed nothing
//!
//! ## Example Usage
//!
//! ```rust
//! use keystone_core::money::{Money, TaxRate};
//!
//! let subtotal = Money::from_cents(100_000); // 1000.00
//! let vat = subtotal.calculate_tax(TaxRate::STANDARD_VAT);
//!
//! assert_eq!(vat.cents(), 15_000);
//! assert_eq!((subtotal + vat).to_string(), "1150.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod conversion;
pub mod error;
pub mod invoice;
pub mod line_item;
pub mod money;
pub mod order;
pub mod purchase_order;
pub mod quote;
pub mod receiving;
pub mod report;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use keystone_core::Money` instead of
// `use keystone_core::money::Money`

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CoreError, CoreResult, InvariantViolation, ValidationError};
pub use invoice::{Invoice, InvoiceStatus, Payment};
pub use line_item::{LineItem, LineItemInput, Totals};
pub use money::{Money, TaxRate};
pub use order::{Order, OrderStatus, PaymentStatus, ProofOfPayment};
pub use purchase_order::{PoLineItem, PoStatus, PurchaseOrder};
pub use quote::{Quote, QuoteStatus};
pub use receiving::{ReceiptOutcome, ReceivingEvent, ReceivingLine, StockMovement};
pub use report::Report;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Standard VAT rate in basis points (15%).
pub const DEFAULT_VAT_RATE_BPS: u32 = 1500;

/// Days between invoice issue and due date when the customer has no terms.
pub const DEFAULT_PAYMENT_TERMS_DAYS: u32 = 30;

/// Maximum quantity on a single line item
///
/// ## Business Reason
/// Catches typing errors (100000 instead of 100) before they reach stock.
pub const MAX_LINE_QUANTITY: i64 = 100_000;

/// Maximum unit price in cents (1 000 000 000.00).
///
/// With the quantity and line limits this keeps every document total
/// inside i64 cents, VAT included.
pub const MAX_UNIT_PRICE_CENTS: i64 = 100_000_000_000;

/// Maximum lines on a single document.
pub const MAX_DOCUMENT_LINES: usize = 200;
