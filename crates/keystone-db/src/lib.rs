//! # keystone-db: Persistence and Service Layer for Keystone
//!
//! SQLite storage for orders, quotes, invoices and purchase orders, and the
//! [`BackOffice`] service that runs every document operation in one
//! transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Keystone Data Flow                               │
//! │                                                                         │
//! │  Presentation / sweep binary / dispatcher                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   keystone-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  BackOffice   │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │ (service.rs)  │───►│ order, quote, │    │  (embedded)  │  │   │
//! │  │   │  Lookup       │    │ invoice, po,  │    │ 001_initial  │  │   │
//! │  │   │  Outbox       │    │ event, ...    │    │              │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │ pure rules                                          │   │
//! │  │           ▼                                                     │   │
//! │  │      keystone-core                                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/keystone/keystone.db                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration (defaults, TOML, environment)
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - `DbError`, `EngineError` and stable error codes
//! - [`repository`] - One repository per table family
//! - [`service`] - [`BackOffice`] operations
//! - [`lookup`] - Read-only status queries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keystone_db::{BackOffice, KeystoneConfig};
//!
//! let config = KeystoneConfig::load(None)?;
//! let office = BackOffice::open(config).await?;
//!
//! let invoice = office.generate_invoice_from_order(&order.id, Default::default()).await?;
//! let invoice = office.send_invoice(&invoice.id, Some(invoice.version)).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod lookup;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod service;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, KeystoneConfig};
pub use error::{DbError, DbResult, EngineError, EngineResult, ErrorCode};
pub use lookup::Lookup;
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig, DbHealth};
pub use repository::event::{DocumentEvent, EventType, Outbox};
pub use service::{BackOffice, NewCustomer, NewProduct, NewSupplier};
