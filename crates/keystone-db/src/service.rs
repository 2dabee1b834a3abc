//! # Back Office Service
//!
//! The transactional surface over keystone-core documents.
//!
//! ## Operation Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply_payment(invoice_id, amount, ...)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  db.begin_write() ─────────────────────────────────────────┐           │
//! │       │                                                    │           │
//! │       ▼                                                    │           │
//! │  load invoice (verify stored totals)                       │ one       │
//! │       │                                                    │ SQLite    │
//! │       ▼                                                    │ trans-    │
//! │  invoice.apply_payment(..)   ← pure keystone-core rules    │ action    │
//! │       │                                                    │           │
//! │       ▼                                                    │           │
//! │  INSERT payment, UPDATE invoice WHERE version = ?          │           │
//! │  UPDATE linked order, INSERT document_events               │           │
//! │       │                                                    │           │
//! │       ▼                                                    │           │
//! │  commit ◄──────────────────────────────────────────────────┘           │
//! │                                                                         │
//! │  Any error drops the transaction: nothing is written.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutating operations take an `expected_version`. When given, a document
//! whose stored version differs fails with `ConcurrentModification` before
//! any rule runs.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use keystone_core::conversion::{self, InvoiceOptions};
use keystone_core::order::NewOrder;
use keystone_core::purchase_order::NewPurchaseOrder;
use keystone_core::quote::NewQuote;
use keystone_core::report::validate_period_days;
use keystone_core::validation::{
    validate_email, validate_payment_terms, validate_price_cents, validate_sku, validate_text,
};
use keystone_core::{
    Address, Clock, CoreError, Customer, DocumentKind, Invoice, LedgerSettings, LineItemInput,
    Money, Order, OrderStatus, PaymentMethod, PoStatus, Product, PurchaseOrder, Quote, QuoteStatus,
    ReceiptOutcome, ReceivingLine, Report, Supplier, SystemClock, ValidationError,
};

use crate::config::KeystoneConfig;
use crate::error::{DbError, EngineResult};
use crate::lookup::Lookup;
use crate::pool::Database;
use crate::repository::event::{EventType, NewEvent, Outbox};
use crate::repository::{
    CustomerRepository, EventRepository, InvoiceRepository, OrderRepository, ProductRepository,
    PurchaseOrderRepository, QuoteRepository, SequenceRepository, SupplierRepository,
};

// =============================================================================
// Reference Data Inputs
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub payment_terms_days: Option<u32>,
    pub credit_limit: Option<Money>,
    pub default_address: Option<Address>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSupplier {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    #[serde(default)]
    pub stock_quantity: i64,
}

// =============================================================================
// Event Helpers
// =============================================================================

fn order_event(order: &Order, event_type: EventType) -> EngineResult<NewEvent> {
    Ok(NewEvent::new(
        DocumentKind::Order,
        &order.id,
        &order.order_number,
        event_type,
        order,
    )?)
}

fn quote_event(quote: &Quote, event_type: EventType) -> EngineResult<NewEvent> {
    Ok(NewEvent::new(
        DocumentKind::Quote,
        &quote.id,
        &quote.quote_number,
        event_type,
        quote,
    )?)
}

fn invoice_event(invoice: &Invoice, event_type: EventType) -> EngineResult<NewEvent> {
    Ok(NewEvent::new(
        DocumentKind::Invoice,
        &invoice.id,
        &invoice.invoice_number,
        event_type,
        invoice,
    )?)
}

fn po_event(po: &PurchaseOrder, event_type: EventType) -> EngineResult<NewEvent> {
    Ok(NewEvent::new(
        DocumentKind::PurchaseOrder,
        &po.id,
        &po.po_number,
        event_type,
        po,
    )?)
}

fn ensure_version(entity: &str, id: &str, stored: i64, expected: Option<i64>) -> EngineResult<()> {
    match expected {
        Some(expected) if expected != stored => {
            debug!(entity, id, stored, expected, "Rejecting stale snapshot");
            Err(DbError::concurrent(entity, id).into())
        }
        _ => Ok(()),
    }
}

async fn ensure_products(conn: &mut SqliteConnection, lines: &[LineItemInput]) -> EngineResult<()> {
    let mut products = ProductRepository::new(conn);
    for product_id in lines.iter().filter_map(|l| l.product_id.as_deref()) {
        if products.find(product_id).await?.is_none() {
            return Err(CoreError::not_found("product", product_id).into());
        }
    }
    Ok(())
}

// =============================================================================
// Back Office
// =============================================================================

/// Orders, quotes, invoices and purchase orders over one SQLite database.
///
/// ## Usage
/// ```rust,ignore
/// let config = KeystoneConfig::load(None)?;
/// let office = BackOffice::open(config).await?;
///
/// let order = office.create_order(new_order).await?;
/// let order = office
///     .transition_order_status(&order.id, OrderStatus::Processing, Some(order.version))
///     .await?;
/// ```
#[derive(Clone)]
pub struct BackOffice {
    db: Database,
    clock: Arc<dyn Clock>,
    config: KeystoneConfig,
    settings: LedgerSettings,
}

impl BackOffice {
    pub fn new(db: Database, config: KeystoneConfig, clock: Arc<dyn Clock>) -> Self {
        let settings = config.ledger_settings();
        BackOffice {
            db,
            clock,
            config,
            settings,
        }
    }

    /// Connects with `config.database` and the wall clock.
    pub async fn open(config: KeystoneConfig) -> EngineResult<Self> {
        let db = Database::new(config.db_config()).await?;
        Ok(BackOffice::new(db, config, Arc::new(SystemClock)))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &KeystoneConfig {
        &self.config
    }

    /// Read-only status and catalogue queries.
    pub fn lookup(&self) -> Lookup {
        Lookup::new(self.db.pool().clone(), self.clock.clone())
    }

    /// Outbox access for notification dispatchers.
    pub fn events(&self) -> Outbox {
        Outbox::new(self.db.pool().clone(), self.clock.clone())
    }

    async fn next_number(
        &self,
        conn: &mut SqliteConnection,
        kind: DocumentKind,
        now: DateTime<Utc>,
    ) -> EngineResult<String> {
        let prefix = self.config.numbering.prefix(kind);
        Ok(SequenceRepository::new(conn)
            .next_number(kind, prefix, now.year())
            .await?)
    }

    // =========================================================================
    // Reference Data
    // =========================================================================

    pub async fn create_customer(&self, input: NewCustomer) -> EngineResult<Customer> {
        validate_text("name", &input.name, 200)?;
        validate_email(&input.email)?;
        if let Some(days) = input.payment_terms_days {
            validate_payment_terms(days)?;
        }
        if let Some(limit) = input.credit_limit {
            validate_price_cents(limit.cents())?;
        }

        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: input.name.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            phone: input.phone,
            company: input.company,
            payment_terms_days: input.payment_terms_days,
            credit_limit: input.credit_limit,
            default_address: input.default_address,
            created_at: self.clock.now(),
        };

        let mut conn = self.db.pool().acquire().await?;
        CustomerRepository::new(&mut conn).insert(&customer).await?;

        info!(customer_id = %customer.id, "Customer created");
        Ok(customer)
    }

    pub async fn create_supplier(&self, input: NewSupplier) -> EngineResult<Supplier> {
        validate_text("name", &input.name, 200)?;
        if let Some(email) = &input.email {
            validate_email(email)?;
        }

        let supplier = Supplier {
            id: Uuid::new_v4().to_string(),
            name: input.name.trim().to_string(),
            email: input.email,
            phone: input.phone,
            created_at: self.clock.now(),
        };

        let mut conn = self.db.pool().acquire().await?;
        SupplierRepository::new(&mut conn).insert(&supplier).await?;

        info!(supplier_id = %supplier.id, "Supplier created");
        Ok(supplier)
    }

    pub async fn create_product(&self, input: NewProduct) -> EngineResult<Product> {
        validate_sku(&input.sku)?;
        validate_text("name", &input.name, 200)?;
        validate_price_cents(input.unit_price.cents())?;
        if input.stock_quantity < 0 {
            return Err(ValidationError::OutOfRange {
                field: "stock_quantity".to_string(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        let now = self.clock.now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: input.sku.trim().to_uppercase(),
            name: input.name.trim().to_string(),
            unit_price: input.unit_price,
            stock_quantity: input.stock_quantity,
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let mut conn = self.db.pool().acquire().await?;
        ProductRepository::new(&mut conn).insert(&product).await?;

        info!(product_id = %product.id, sku = %product.sku, "Product created");
        Ok(product)
    }

    pub async fn get_product(&self, product_id: &str) -> EngineResult<Product> {
        let mut conn = self.db.pool().acquire().await?;
        Ok(ProductRepository::new(&mut conn).get(product_id).await?)
    }

    // =========================================================================
    // Orders
    // =========================================================================

    pub async fn create_order(&self, input: NewOrder) -> EngineResult<Order> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let customer = CustomerRepository::new(&mut *tx)
            .find(&input.customer_id)
            .await?
            .ok_or_else(|| CoreError::not_found("customer", input.customer_id.as_str()))?;
        ensure_products(&mut *tx, &input.lines).await?;

        let number = self.next_number(&mut *tx, DocumentKind::Order, now).await?;
        let order = Order::create(
            Uuid::new_v4().to_string(),
            number,
            input,
            &customer,
            &self.settings,
            now,
        )?;

        if order.payment_method == PaymentMethod::CreditAccount {
            let outstanding = CustomerRepository::new(&mut *tx)
                .credit_outstanding(&customer.id, None)
                .await?;
            order.check_credit(&customer, outstanding)?;
        }

        OrderRepository::new(&mut *tx).insert(&order).await?;
        EventRepository::new(&mut *tx)
            .record(order_event(&order, EventType::Created)?, now)
            .await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            number = %order.order_number,
            total = %order.totals.total,
            "Order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &str) -> EngineResult<Order> {
        let mut conn = self.db.pool().acquire().await?;
        Ok(OrderRepository::new(&mut conn).get(order_id).await?)
    }

    pub async fn transition_order_status(
        &self,
        order_id: &str,
        to: OrderStatus,
        expected_version: Option<i64>,
    ) -> EngineResult<Order> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut order = OrderRepository::new(&mut *tx).get(order_id).await?;
        ensure_version("Order", order_id, order.version, expected_version)?;

        let from = order.status;
        order.transition(to, now)?;

        OrderRepository::new(&mut *tx).update(&mut order).await?;
        EventRepository::new(&mut *tx)
            .record(
                order_event(&order, EventType::StatusChanged)?.status_change(from, to),
                now,
            )
            .await?;
        tx.commit().await?;

        info!(order_id = %order.id, from = %from, to = %to, "Order status changed");
        Ok(order)
    }

    /// Replaces an order's lines. Credit-account orders are re-checked
    /// against the customer's limit.
    pub async fn update_order_lines(
        &self,
        order_id: &str,
        lines: Vec<LineItemInput>,
        expected_version: Option<i64>,
    ) -> EngineResult<Order> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut order = OrderRepository::new(&mut *tx).get(order_id).await?;
        ensure_version("Order", order_id, order.version, expected_version)?;
        ensure_products(&mut *tx, &lines).await?;

        order.replace_lines(lines, now)?;

        if order.payment_method == PaymentMethod::CreditAccount {
            let customer = CustomerRepository::new(&mut *tx).get(&order.customer_id).await?;
            let outstanding = CustomerRepository::new(&mut *tx)
                .credit_outstanding(&customer.id, Some(&order.id))
                .await?;
            order.check_credit(&customer, outstanding)?;
        }

        OrderRepository::new(&mut *tx).update(&mut order).await?;
        EventRepository::new(&mut *tx)
            .record(order_event(&order, EventType::LinesUpdated)?, now)
            .await?;
        tx.commit().await?;

        info!(order_id = %order.id, total = %order.totals.total, "Order lines updated");
        Ok(order)
    }

    pub async fn update_delivery_address(
        &self,
        order_id: &str,
        address: Address,
        expected_version: Option<i64>,
    ) -> EngineResult<Order> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut order = OrderRepository::new(&mut *tx).get(order_id).await?;
        ensure_version("Order", order_id, order.version, expected_version)?;

        order.set_delivery_address(address, now)?;

        OrderRepository::new(&mut *tx).update(&mut order).await?;
        EventRepository::new(&mut *tx)
            .record(order_event(&order, EventType::AddressUpdated)?, now)
            .await?;
        tx.commit().await?;

        info!(order_id = %order.id, "Delivery address updated");
        Ok(order)
    }

    pub async fn upload_pop(
        &self,
        order_id: &str,
        file_handle: &str,
        expected_version: Option<i64>,
    ) -> EngineResult<Order> {
        self.update_pop(order_id, expected_version, EventType::PopUploaded, |order, now| {
            order.upload_pop(file_handle, now)
        })
        .await
    }

    pub async fn approve_pop(
        &self,
        order_id: &str,
        expected_version: Option<i64>,
    ) -> EngineResult<Order> {
        self.update_pop(order_id, expected_version, EventType::PopApproved, |order, now| {
            order.approve_pop(now)
        })
        .await
    }

    pub async fn reject_pop(
        &self,
        order_id: &str,
        reason: &str,
        expected_version: Option<i64>,
    ) -> EngineResult<Order> {
        self.update_pop(order_id, expected_version, EventType::PopRejected, |order, now| {
            order.reject_pop(reason, now)
        })
        .await
    }

    async fn update_pop<F>(
        &self,
        order_id: &str,
        expected_version: Option<i64>,
        event_type: EventType,
        apply: F,
    ) -> EngineResult<Order>
    where
        F: FnOnce(&mut Order, DateTime<Utc>) -> Result<(), CoreError>,
    {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut order = OrderRepository::new(&mut *tx).get(order_id).await?;
        ensure_version("Order", order_id, order.version, expected_version)?;

        let from = order.status;
        apply(&mut order, now)?;

        OrderRepository::new(&mut *tx).update(&mut order).await?;
        EventRepository::new(&mut *tx)
            .record(
                order_event(&order, event_type)?.status_change(from, order.status),
                now,
            )
            .await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            event = %event_type,
            payment_status = %order.payment_status,
            "Proof of payment updated"
        );
        Ok(order)
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    pub async fn create_quote(&self, input: NewQuote) -> EngineResult<Quote> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        if let Some(customer_id) = input.customer_id.as_deref().filter(|c| !c.trim().is_empty()) {
            if CustomerRepository::new(&mut *tx).find(customer_id).await?.is_none() {
                return Err(CoreError::not_found("customer", customer_id).into());
            }
        }
        ensure_products(&mut *tx, &input.lines).await?;

        let number = self.next_number(&mut *tx, DocumentKind::Quote, now).await?;
        let quote = Quote::create(
            Uuid::new_v4().to_string(),
            number,
            input,
            &self.settings,
            now,
        )?;

        QuoteRepository::new(&mut *tx).insert(&quote).await?;
        EventRepository::new(&mut *tx)
            .record(quote_event(&quote, EventType::Created)?, now)
            .await?;
        tx.commit().await?;

        info!(
            quote_id = %quote.id,
            number = %quote.quote_number,
            valid_until = %quote.valid_until,
            "Quote created"
        );
        Ok(quote)
    }

    pub async fn get_quote(&self, quote_id: &str) -> EngineResult<Quote> {
        let mut conn = self.db.pool().acquire().await?;
        Ok(QuoteRepository::new(&mut conn).get(quote_id).await?)
    }

    pub async fn transition_quote_status(
        &self,
        quote_id: &str,
        to: QuoteStatus,
        expected_version: Option<i64>,
    ) -> EngineResult<Quote> {
        self.update_quote(quote_id, expected_version, EventType::StatusChanged, |quote, now| {
            quote.transition(to, now)
        })
        .await
    }

    pub async fn reject_quote(
        &self,
        quote_id: &str,
        reason: &str,
        expected_version: Option<i64>,
    ) -> EngineResult<Quote> {
        self.update_quote(quote_id, expected_version, EventType::StatusChanged, |quote, now| {
            quote.reject(reason, now)
        })
        .await
    }

    pub async fn update_quote_lines(
        &self,
        quote_id: &str,
        lines: Vec<LineItemInput>,
        expected_version: Option<i64>,
    ) -> EngineResult<Quote> {
        {
            let mut conn = self.db.pool().acquire().await?;
            ensure_products(&mut conn, &lines).await?;
        }
        self.update_quote(quote_id, expected_version, EventType::LinesUpdated, |quote, now| {
            quote.replace_lines(lines, now)
        })
        .await
    }

    async fn update_quote<F>(
        &self,
        quote_id: &str,
        expected_version: Option<i64>,
        event_type: EventType,
        apply: F,
    ) -> EngineResult<Quote>
    where
        F: FnOnce(&mut Quote, DateTime<Utc>) -> Result<(), CoreError>,
    {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut quote = QuoteRepository::new(&mut *tx).get(quote_id).await?;
        ensure_version("Quote", quote_id, quote.version, expected_version)?;

        let from = quote.status;
        apply(&mut quote, now)?;

        QuoteRepository::new(&mut *tx).update(&mut quote).await?;
        EventRepository::new(&mut *tx)
            .record(
                quote_event(&quote, event_type)?.status_change(from, quote.status),
                now,
            )
            .await?;
        tx.commit().await?;

        info!(quote_id = %quote.id, from = %from, to = %quote.status, "Quote updated");
        Ok(quote)
    }

    /// Turns a PENDING or ACCEPTED quote into a PENDING order with the same
    /// lines and total, and marks the quote CONVERTED.
    pub async fn convert_quote_to_order(
        &self,
        quote_id: &str,
        expected_version: Option<i64>,
    ) -> EngineResult<(Quote, Order)> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut quote = QuoteRepository::new(&mut *tx).get(quote_id).await?;
        ensure_version("Quote", quote_id, quote.version, expected_version)?;

        let customer_id = quote.ensure_convertible(now.date_naive())?.to_string();
        let customer = CustomerRepository::new(&mut *tx)
            .find(&customer_id)
            .await?
            .ok_or_else(|| CoreError::not_found("customer", customer_id.as_str()))?;

        let from = quote.status;
        let number = self.next_number(&mut *tx, DocumentKind::Order, now).await?;
        let order = conversion::quote_to_order(
            &mut quote,
            &customer,
            Uuid::new_v4().to_string(),
            number,
            &self.settings,
            now,
        )?;

        OrderRepository::new(&mut *tx).insert(&order).await?;
        QuoteRepository::new(&mut *tx).update(&mut quote).await?;

        let mut events = EventRepository::new(&mut *tx);
        events
            .record(
                quote_event(&quote, EventType::Converted)?.status_change(from, quote.status),
                now,
            )
            .await?;
        events
            .record(order_event(&order, EventType::Created)?, now)
            .await?;
        tx.commit().await?;

        info!(
            quote_id = %quote.id,
            order_id = %order.id,
            number = %order.order_number,
            "Quote converted to order"
        );
        Ok((quote, order))
    }

    /// Moves every open quote past its validity date to EXPIRED.
    ///
    /// Returns the quotes that changed; a second run finds none.
    pub async fn expire_quotes(&self) -> EngineResult<Vec<Quote>> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let candidates = QuoteRepository::new(&mut *tx)
            .list_expirable(now.date_naive())
            .await?;

        let mut expired = Vec::with_capacity(candidates.len());
        for mut quote in candidates {
            let from = quote.status;
            if !quote.expire_if_due(now) {
                continue;
            }
            QuoteRepository::new(&mut *tx).update(&mut quote).await?;
            EventRepository::new(&mut *tx)
                .record(
                    quote_event(&quote, EventType::StatusChanged)?
                        .status_change(from, quote.status),
                    now,
                )
                .await?;
            expired.push(quote);
        }
        tx.commit().await?;

        info!(count = expired.len(), "Expired quotes");
        Ok(expired)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Opens a DRAFT invoice for an order. An order is invoiced at most once.
    pub async fn generate_invoice_from_order(
        &self,
        order_id: &str,
        options: InvoiceOptions,
    ) -> EngineResult<Invoice> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let order = OrderRepository::new(&mut *tx).get(order_id).await?;
        let existing = InvoiceRepository::new(&mut *tx).id_for_order(order_id).await?;
        let customer = CustomerRepository::new(&mut *tx).get(&order.customer_id).await?;

        let number = self.next_number(&mut *tx, DocumentKind::Invoice, now).await?;
        let invoice = conversion::order_to_invoice(
            &order,
            existing.as_deref(),
            &customer,
            Uuid::new_v4().to_string(),
            number,
            options,
            &self.settings,
            now,
        )?;

        InvoiceRepository::new(&mut *tx).insert(&invoice).await?;
        EventRepository::new(&mut *tx)
            .record(invoice_event(&invoice, EventType::Created)?, now)
            .await?;
        tx.commit().await?;

        info!(
            invoice_id = %invoice.id,
            number = %invoice.invoice_number,
            order_id = %order.id,
            due_date = %invoice.due_date,
            "Invoice generated"
        );
        Ok(invoice)
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> EngineResult<Invoice> {
        let mut conn = self.db.pool().acquire().await?;
        Ok(InvoiceRepository::new(&mut conn).get(invoice_id).await?)
    }

    pub async fn send_invoice(
        &self,
        invoice_id: &str,
        expected_version: Option<i64>,
    ) -> EngineResult<Invoice> {
        self.update_invoice(invoice_id, expected_version, |invoice, now| invoice.send(now))
            .await
    }

    pub async fn cancel_invoice(
        &self,
        invoice_id: &str,
        expected_version: Option<i64>,
    ) -> EngineResult<Invoice> {
        self.update_invoice(invoice_id, expected_version, |invoice, now| invoice.cancel(now))
            .await
    }

    async fn update_invoice<F>(
        &self,
        invoice_id: &str,
        expected_version: Option<i64>,
        apply: F,
    ) -> EngineResult<Invoice>
    where
        F: FnOnce(&mut Invoice, DateTime<Utc>) -> Result<(), CoreError>,
    {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut invoice = InvoiceRepository::new(&mut *tx).get(invoice_id).await?;
        ensure_version("Invoice", invoice_id, invoice.version, expected_version)?;

        let from = invoice.status;
        apply(&mut invoice, now)?;

        InvoiceRepository::new(&mut *tx).update(&mut invoice).await?;
        EventRepository::new(&mut *tx)
            .record(
                invoice_event(&invoice, EventType::StatusChanged)?
                    .status_change(from, invoice.status),
                now,
            )
            .await?;
        tx.commit().await?;

        info!(
            invoice_id = %invoice.id,
            from = %from,
            to = %invoice.status,
            "Invoice status changed"
        );
        Ok(invoice)
    }

    /// Records a payment against a sent invoice.
    ///
    /// The invoice's order follows: PAID once nothing is due, PARTIAL before.
    pub async fn apply_payment(
        &self,
        invoice_id: &str,
        amount: Money,
        method: PaymentMethod,
        reference: Option<String>,
        expected_version: Option<i64>,
    ) -> EngineResult<Invoice> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut invoice = InvoiceRepository::new(&mut *tx).get(invoice_id).await?;
        ensure_version("Invoice", invoice_id, invoice.version, expected_version)?;

        let from = invoice.status;
        let payment = invoice
            .apply_payment(Uuid::new_v4().to_string(), amount, method, reference, now)?
            .clone();

        let mut invoices = InvoiceRepository::new(&mut *tx);
        invoices.insert_payment(&payment).await?;
        invoices.update(&mut invoice).await?;

        EventRepository::new(&mut *tx)
            .record(
                invoice_event(&invoice, EventType::PaymentApplied)?
                    .status_change(from, invoice.status),
                now,
            )
            .await?;

        if let Some(order_id) = invoice.order_id.as_deref() {
            let mut order = OrderRepository::new(&mut *tx).get(order_id).await?;
            let previous = order.payment_status;
            order.follow_invoice_payment(invoice.amount_due(), now);
            OrderRepository::new(&mut *tx).update(&mut order).await?;
            EventRepository::new(&mut *tx)
                .record(
                    order_event(&order, EventType::PaymentApplied)?
                        .status_change(previous, order.payment_status),
                    now,
                )
                .await?;
        }
        tx.commit().await?;

        info!(
            invoice_id = %invoice.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            amount_due = %invoice.amount_due(),
            status = %invoice.status,
            "Payment applied"
        );
        Ok(invoice)
    }

    /// Marks sent invoices past their due date OVERDUE.
    ///
    /// Returns the invoices that changed; a second run finds none.
    pub async fn refresh_overdue(&self) -> EngineResult<Vec<Invoice>> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let candidates = InvoiceRepository::new(&mut *tx)
            .list_overdue_candidates(now.date_naive())
            .await?;

        let mut changed = Vec::with_capacity(candidates.len());
        for mut invoice in candidates {
            let from = invoice.status;
            if !invoice.refresh_status(now) {
                continue;
            }
            InvoiceRepository::new(&mut *tx).update(&mut invoice).await?;
            EventRepository::new(&mut *tx)
                .record(
                    invoice_event(&invoice, EventType::StatusChanged)?
                        .status_change(from, invoice.status),
                    now,
                )
                .await?;
            changed.push(invoice);
        }
        tx.commit().await?;

        info!(count = changed.len(), "Refreshed overdue invoices");
        Ok(changed)
    }

    // =========================================================================
    // Purchase Orders
    // =========================================================================

    pub async fn create_purchase_order(&self, input: NewPurchaseOrder) -> EngineResult<PurchaseOrder> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        SupplierRepository::new(&mut *tx).get(&input.supplier_id).await?;
        ensure_products(&mut *tx, &input.lines).await?;

        let number = self
            .next_number(&mut *tx, DocumentKind::PurchaseOrder, now)
            .await?;
        let po = PurchaseOrder::create(
            Uuid::new_v4().to_string(),
            number,
            input,
            &self.settings,
            now,
        )?;

        PurchaseOrderRepository::new(&mut *tx).insert(&po).await?;
        EventRepository::new(&mut *tx)
            .record(po_event(&po, EventType::Created)?, now)
            .await?;
        tx.commit().await?;

        info!(
            po_id = %po.id,
            number = %po.po_number,
            total = %po.totals.total,
            "Purchase order created"
        );
        Ok(po)
    }

    pub async fn get_purchase_order(&self, po_id: &str) -> EngineResult<PurchaseOrder> {
        let mut conn = self.db.pool().acquire().await?;
        Ok(PurchaseOrderRepository::new(&mut conn).get(po_id).await?)
    }

    pub async fn transition_po_status(
        &self,
        po_id: &str,
        to: PoStatus,
        expected_version: Option<i64>,
    ) -> EngineResult<PurchaseOrder> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut po = PurchaseOrderRepository::new(&mut *tx).get(po_id).await?;
        ensure_version("PurchaseOrder", po_id, po.version, expected_version)?;

        let from = po.status;
        po.transition(to, now)?;

        PurchaseOrderRepository::new(&mut *tx).update(&mut po).await?;
        EventRepository::new(&mut *tx)
            .record(po_event(&po, EventType::StatusChanged)?.status_change(from, to), now)
            .await?;
        tx.commit().await?;

        info!(po_id = %po.id, from = %from, to = %to, "Purchase order status changed");
        Ok(po)
    }

    pub async fn update_purchase_order_lines(
        &self,
        po_id: &str,
        lines: Vec<LineItemInput>,
        expected_version: Option<i64>,
    ) -> EngineResult<PurchaseOrder> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut po = PurchaseOrderRepository::new(&mut *tx).get(po_id).await?;
        ensure_version("PurchaseOrder", po_id, po.version, expected_version)?;
        ensure_products(&mut *tx, &lines).await?;

        po.replace_lines(lines, now)?;

        PurchaseOrderRepository::new(&mut *tx).update(&mut po).await?;
        EventRepository::new(&mut *tx)
            .record(po_event(&po, EventType::LinesUpdated)?, now)
            .await?;
        tx.commit().await?;

        info!(po_id = %po.id, total = %po.totals.total, "Purchase order lines updated");
        Ok(po)
    }

    /// Records a delivery. Accepted units go into stock; rejected units
    /// only count against the line.
    pub async fn receive_stock(
        &self,
        po_id: &str,
        lines: Vec<ReceivingLine>,
        notes: Option<String>,
        expected_version: Option<i64>,
    ) -> EngineResult<PurchaseOrder> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut po = PurchaseOrderRepository::new(&mut *tx).get(po_id).await?;
        ensure_version("PurchaseOrder", po_id, po.version, expected_version)?;

        let outcome = po.receive(Uuid::new_v4().to_string(), lines, notes, now)?;
        self.save_receipt(&mut *tx, &mut po, outcome, now).await?;
        tx.commit().await?;

        Ok(po)
    }

    /// Receives everything still outstanding as accepted.
    pub async fn receive_all_remaining(
        &self,
        po_id: &str,
        notes: Option<String>,
        expected_version: Option<i64>,
    ) -> EngineResult<PurchaseOrder> {
        let now = self.clock.now();
        let mut tx = self.db.begin_write().await?;

        let mut po = PurchaseOrderRepository::new(&mut *tx).get(po_id).await?;
        ensure_version("PurchaseOrder", po_id, po.version, expected_version)?;

        let outcome = po.receive_all_remaining(Uuid::new_v4().to_string(), notes, now)?;
        self.save_receipt(&mut *tx, &mut po, outcome, now).await?;
        tx.commit().await?;

        Ok(po)
    }

    async fn save_receipt(
        &self,
        conn: &mut SqliteConnection,
        po: &mut PurchaseOrder,
        outcome: ReceiptOutcome,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut purchase_orders = PurchaseOrderRepository::new(&mut *conn);
        purchase_orders.update(po).await?;
        purchase_orders.insert_receiving_event(&outcome.event).await?;

        let mut products = ProductRepository::new(&mut *conn);
        for movement in &outcome.movements {
            products.apply_movement(movement, now).await?;
        }

        EventRepository::new(&mut *conn)
            .record(
                po_event(po, EventType::StockReceived)?
                    .status_change(outcome.previous_status, po.status),
                now,
            )
            .await?;

        info!(
            po_id = %po.id,
            receipt_id = %outcome.event.id,
            movements = outcome.movements.len(),
            status = %po.status,
            "Stock received"
        );
        Ok(())
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Revenue, order and invoice figures for the last `period_days` days.
    pub async fn get_report(&self, period_days: u32) -> EngineResult<Report> {
        validate_period_days(period_days)?;
        let now = self.clock.now();
        let since = now - Duration::days(i64::from(period_days));

        let mut conn = self.db.pool().acquire().await?;
        let orders = OrderRepository::new(&mut conn).list_created_since(since).await?;
        let invoices = InvoiceRepository::new(&mut conn).list_all().await?;
        let customers = CustomerRepository::new(&mut conn).list().await?;

        debug!(
            period_days,
            orders = orders.len(),
            invoices = invoices.len(),
            "Building report"
        );

        Ok(Report::build(
            period_days,
            now,
            &orders,
            &invoices,
            &customers,
            self.config.report.default_top_n,
        )?)
    }
}
