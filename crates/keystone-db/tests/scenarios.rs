//! End-to-end document flows against an in-memory database.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use keystone_core::conversion::InvoiceOptions;
use keystone_core::order::NewOrder;
use keystone_core::purchase_order::NewPurchaseOrder;
use keystone_core::quote::NewQuote;
use keystone_core::{
    Address, Clock, Customer, FixedClock, InvoiceStatus, LineItemInput, Money, Order, OrderStatus,
    PaymentMethod, PaymentStatus, PoStatus, Product, PurchaseOrder, QuoteStatus, ReceivingLine,
};
use keystone_db::{
    BackOffice, Database, DbConfig, EngineError, ErrorCode, KeystoneConfig, NewCustomer,
    NewProduct, NewSupplier,
};

async fn setup() -> (BackOffice, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let office = BackOffice::new(db, KeystoneConfig::in_memory(), clock.clone());
    (office, clock)
}

/// A service over a real database file, so several connections can race.
async fn setup_file(dir: &TempDir) -> BackOffice {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let config = DbConfig::new(dir.path().join("keystone.db")).max_connections(4);
    let db = Database::new(config).await.unwrap();
    BackOffice::new(db, KeystoneConfig::in_memory(), clock)
}

async fn customer(office: &BackOffice, email: &str) -> Customer {
    office
        .create_customer(NewCustomer {
            name: "Thandi Mokoena".to_string(),
            email: email.to_string(),
            payment_terms_days: Some(30),
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn product(office: &BackOffice, sku: &str, price_cents: i64, stock: i64) -> Product {
    office
        .create_product(NewProduct {
            sku: sku.to_string(),
            name: format!("Item {}", sku),
            unit_price: Money::from_cents(price_cents),
            stock_quantity: stock,
        })
        .await
        .unwrap()
}

/// One order of 10 x 100.00 (total 1150.00 at 15% VAT).
async fn order(office: &BackOffice) -> Order {
    let customer = customer(office, "orders@example.test").await;
    let bolt = product(office, "FIX-HEX-001", 10_000, 100).await;
    office
        .create_order(NewOrder {
            customer_id: customer.id,
            lines: vec![LineItemInput::for_product(&bolt, 10)],
            payment_method: PaymentMethod::BankTransfer,
            ..Default::default()
        })
        .await
        .unwrap()
}

fn code<T: std::fmt::Debug>(result: Result<T, EngineError>) -> ErrorCode {
    result.unwrap_err().code()
}

// =============================================================================
// Quotes
// =============================================================================

#[tokio::test]
async fn test_quote_converts_to_order_with_same_total() {
    let (office, clock) = setup().await;
    let customer = customer(&office, "quotes@example.test").await;
    let bolt = product(&office, "FIX-HEX-001", 10_000, 100).await;

    let quote = office
        .create_quote(NewQuote {
            customer_id: Some(customer.id.clone()),
            contact: None,
            lines: vec![LineItemInput::for_product(&bolt, 10)],
            valid_until: clock.now().date_naive() + Duration::days(14),
            requested_by_customer: true,
            notes: None,
        })
        .await
        .unwrap();

    assert_eq!(quote.status, QuoteStatus::Pending);
    assert_eq!(quote.totals.subtotal, Money::from_cents(100_000));
    assert_eq!(quote.totals.vat, Money::from_cents(15_000));
    assert_eq!(quote.totals.total, Money::from_cents(115_000));

    let (quote, order) = office
        .convert_quote_to_order(&quote.id, Some(quote.version))
        .await
        .unwrap();

    assert_eq!(quote.status, QuoteStatus::Converted);
    assert_eq!(quote.order_id.as_deref(), Some(order.id.as_str()));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.totals.total, Money::from_cents(115_000));
    assert_eq!(order.source_quote_id.as_deref(), Some(quote.id.as_str()));

    let stored = office.get_quote(&quote.id).await.unwrap();
    assert_eq!(stored.status, QuoteStatus::Converted);

    assert_eq!(
        code(office.convert_quote_to_order(&quote.id, None).await),
        ErrorCode::AlreadyConverted
    );
}

#[tokio::test]
async fn test_quote_lines_carry_through_to_invoice() {
    let (office, clock) = setup().await;
    let customer = customer(&office, "roundtrip@example.test").await;
    let bolt = product(&office, "FIX-HEX-001", 10_000, 100).await;

    let quote = office
        .create_quote(NewQuote {
            customer_id: Some(customer.id),
            contact: None,
            lines: vec![
                LineItemInput::for_product(&bolt, 10),
                LineItemInput::custom("Site installation", 3, Money::from_cents(45_050)),
            ],
            valid_until: clock.now().date_naive() + Duration::days(14),
            requested_by_customer: true,
            notes: None,
        })
        .await
        .unwrap();

    let (quote, order) = office
        .convert_quote_to_order(&quote.id, Some(quote.version))
        .await
        .unwrap();
    let invoice = office
        .generate_invoice_from_order(&order.id, InvoiceOptions::default())
        .await
        .unwrap();

    assert_eq!(invoice.lines.len(), quote.lines.len());
    for (quoted, invoiced) in quote.lines.iter().zip(&invoice.lines) {
        assert_ne!(quoted.id, invoiced.id);
        assert_eq!(invoiced.product_id, quoted.product_id);
        assert_eq!(invoiced.description, quoted.description);
        assert_eq!(invoiced.quantity, quoted.quantity);
        assert_eq!(invoiced.unit_price, quoted.unit_price);
        assert_eq!(invoiced.line_total(), quoted.line_total());
    }
    assert_eq!(invoice.totals, quote.totals);
    let snapshot = serde_json::to_value(&invoice.lines).unwrap();

    let order = office
        .update_order_lines(
            &order.id,
            vec![LineItemInput::for_product(&bolt, 2)],
            Some(order.version),
        )
        .await
        .unwrap();
    assert_eq!(order.totals.subtotal, Money::from_cents(20_000));
    assert_eq!(
        code(
            office
                .update_quote_lines(&quote.id, vec![LineItemInput::for_product(&bolt, 1)], None)
                .await
        ),
        ErrorCode::DocumentLocked
    );

    let stored = office.get_invoice(&invoice.id).await.unwrap();
    assert_eq!(serde_json::to_value(&stored.lines).unwrap(), snapshot);
    assert_eq!(stored.totals, invoice.totals);
}

#[tokio::test]
async fn test_lapsed_quote_cannot_convert() {
    let (office, clock) = setup().await;
    let customer = customer(&office, "late@example.test").await;
    let bolt = product(&office, "FIX-HEX-001", 10_000, 100).await;

    let quote = office
        .create_quote(NewQuote {
            customer_id: Some(customer.id),
            contact: None,
            lines: vec![LineItemInput::for_product(&bolt, 1)],
            valid_until: clock.now().date_naive() + Duration::days(3),
            requested_by_customer: true,
            notes: None,
        })
        .await
        .unwrap();

    clock.advance(Duration::days(4));
    assert_eq!(
        code(office.convert_quote_to_order(&quote.id, None).await),
        ErrorCode::QuoteExpired
    );
}

#[tokio::test]
async fn test_quote_rejection_needs_reason() {
    let (office, clock) = setup().await;
    let customer = customer(&office, "no@example.test").await;
    let bolt = product(&office, "FIX-HEX-001", 10_000, 100).await;

    let quote = office
        .create_quote(NewQuote {
            customer_id: Some(customer.id),
            contact: None,
            lines: vec![LineItemInput::for_product(&bolt, 2)],
            valid_until: clock.now().date_naive() + Duration::days(7),
            requested_by_customer: true,
            notes: None,
        })
        .await
        .unwrap();

    assert_eq!(
        code(
            office
                .transition_quote_status(&quote.id, QuoteStatus::Rejected, None)
                .await
        ),
        ErrorCode::MissingReason
    );
    assert_eq!(
        code(office.reject_quote(&quote.id, "  ", None).await),
        ErrorCode::MissingReason
    );

    let rejected = office
        .reject_quote(&quote.id, "Found a cheaper supplier", Some(quote.version))
        .await
        .unwrap();
    assert_eq!(rejected.status, QuoteStatus::Rejected);
}

// =============================================================================
// Invoices
// =============================================================================

#[tokio::test]
async fn test_partial_then_full_payment() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;

    let invoice = office
        .generate_invoice_from_order(&order.id, InvoiceOptions::default())
        .await
        .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.totals.total, Money::from_cents(115_000));

    let invoice = office
        .send_invoice(&invoice.id, Some(invoice.version))
        .await
        .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Sent);

    let invoice = office
        .apply_payment(
            &invoice.id,
            Money::from_cents(50_000),
            PaymentMethod::BankTransfer,
            Some("EFT-001".to_string()),
            Some(invoice.version),
        )
        .await
        .unwrap();
    assert_eq!(invoice.amount_due(), Money::from_cents(65_000));
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(
        office.get_order(&order.id).await.unwrap().payment_status,
        PaymentStatus::Partial
    );

    let invoice = office
        .apply_payment(
            &invoice.id,
            Money::from_cents(65_000),
            PaymentMethod::BankTransfer,
            None,
            Some(invoice.version),
        )
        .await
        .unwrap();
    assert_eq!(invoice.amount_due(), Money::zero());
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(
        office.get_order(&order.id).await.unwrap().payment_status,
        PaymentStatus::Paid
    );

    assert_eq!(
        code(
            office
                .apply_payment(&invoice.id, Money::from_cents(100), PaymentMethod::Cash, None, None)
                .await
        ),
        ErrorCode::OverApplication
    );

    let stored = office.get_invoice(&invoice.id).await.unwrap();
    assert_eq!(stored.payments.len(), 2);
    assert_eq!(stored.amount_paid(), Money::from_cents(115_000));
}

#[tokio::test]
async fn test_draft_invoice_rejects_payment() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;
    let invoice = office
        .generate_invoice_from_order(&order.id, InvoiceOptions::default())
        .await
        .unwrap();

    assert_eq!(
        code(
            office
                .apply_payment(&invoice.id, Money::from_cents(100), PaymentMethod::Cash, None, None)
                .await
        ),
        ErrorCode::InvalidTransition
    );
}

#[tokio::test]
async fn test_order_invoiced_once() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;

    office
        .generate_invoice_from_order(&order.id, InvoiceOptions::default())
        .await
        .unwrap();
    assert_eq!(
        code(
            office
                .generate_invoice_from_order(&order.id, InvoiceOptions::default())
                .await
        ),
        ErrorCode::AlreadyInvoiced
    );
}

#[tokio::test]
async fn test_overdue_sweep_is_idempotent() {
    let (office, clock) = setup().await;
    let order = order(&office).await;
    let invoice = office
        .generate_invoice_from_order(&order.id, InvoiceOptions::default())
        .await
        .unwrap();
    let invoice = office.send_invoice(&invoice.id, None).await.unwrap();
    assert_eq!(invoice.due_date, clock.now().date_naive() + Duration::days(30));

    assert!(office.refresh_overdue().await.unwrap().is_empty());

    clock.advance(Duration::days(31));
    let changed = office.refresh_overdue().await.unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].status, InvoiceStatus::Overdue);
    assert!(office.refresh_overdue().await.unwrap().is_empty());

    let summary = office
        .lookup()
        .invoice_status(&invoice.invoice_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.status, InvoiceStatus::Overdue);
    assert_eq!(summary.amount_due, Money::from_cents(115_000));
}

// =============================================================================
// Orders
// =============================================================================

async fn walk_to(office: &BackOffice, order: Order, path: &[OrderStatus]) -> Order {
    let mut order = order;
    for status in path {
        order = office
            .transition_order_status(&order.id, *status, Some(order.version))
            .await
            .unwrap();
    }
    order
}

#[tokio::test]
async fn test_dispatched_order_is_locked() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;
    let order = walk_to(
        &office,
        order,
        &[
            OrderStatus::Confirmed,
            OrderStatus::AwaitingPayment,
            OrderStatus::PaymentReceived,
            OrderStatus::Processing,
            OrderStatus::ReadyForDispatch,
            OrderStatus::Dispatched,
        ],
    )
    .await;
    assert_eq!(order.status, OrderStatus::Dispatched);

    let lines = order
        .lines
        .iter()
        .map(|l| LineItemInput {
            product_id: l.product_id.clone(),
            description: l.description.clone(),
            sku: l.sku.clone(),
            quantity: 1,
            unit_price: l.unit_price,
        })
        .collect();
    assert_eq!(
        code(office.update_order_lines(&order.id, lines, None).await),
        ErrorCode::DocumentLocked
    );
    assert_eq!(
        code(
            office
                .transition_order_status(&order.id, OrderStatus::Processing, None)
                .await
        ),
        ErrorCode::InvalidTransition
    );

    assert_eq!(
        code(
            office
                .update_delivery_address(&order.id, depot_address(), None)
                .await
        ),
        ErrorCode::DocumentLocked
    );

    let stored = office.get_order(&order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Dispatched);
    assert_eq!(stored.lines[0].quantity, 10);
}

fn depot_address() -> Address {
    Address {
        line1: "12 Dock Road".to_string(),
        line2: None,
        city: "Cape Town".to_string(),
        postal_code: "8001".to_string(),
        country: "ZA".to_string(),
    }
}

#[tokio::test]
async fn test_delivery_address_persists() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;

    let order = office
        .update_delivery_address(&order.id, depot_address(), Some(order.version))
        .await
        .unwrap();

    let stored = office.get_order(&order.id).await.unwrap();
    assert_eq!(stored.delivery_address, Some(depot_address()));
    assert_eq!(stored.version, order.version);

    let events = office.events().pending(10).await.unwrap();
    let change = events.last().unwrap();
    assert_eq!(change.topic(), "ORDER_ADDRESS_UPDATED");
    assert_eq!(change.document_id, order.id);
    assert!(!change.payload["deliveryAddress"].is_null());
}

#[tokio::test]
async fn test_on_hold_resumes_to_previous_state() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;
    let order = walk_to(&office, order, &[OrderStatus::Confirmed, OrderStatus::OnHold]).await;
    assert_eq!(order.held_from, Some(OrderStatus::Confirmed));

    assert_eq!(
        code(
            office
                .transition_order_status(&order.id, OrderStatus::Processing, None)
                .await
        ),
        ErrorCode::InvalidTransition
    );

    let order = walk_to(&office, order, &[OrderStatus::Confirmed]).await;
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.held_from, None);
}

#[tokio::test]
async fn test_stale_version_is_rejected() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;
    let stale = order.version;

    let confirmed = office
        .transition_order_status(&order.id, OrderStatus::Confirmed, Some(stale))
        .await
        .unwrap();
    assert_eq!(confirmed.version, stale + 1);

    assert_eq!(
        code(
            office
                .transition_order_status(&order.id, OrderStatus::Cancelled, Some(stale))
                .await
        ),
        ErrorCode::ConcurrentModification
    );
    assert_eq!(
        office.get_order(&order.id).await.unwrap().status,
        OrderStatus::Confirmed
    );
}

#[tokio::test]
async fn test_pop_approval_marks_order_paid() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;
    let order = walk_to(
        &office,
        order,
        &[OrderStatus::Confirmed, OrderStatus::AwaitingPayment],
    )
    .await;

    let order = office
        .upload_pop(&order.id, "uploads/pop-0001.pdf", Some(order.version))
        .await
        .unwrap();
    let summary = office
        .lookup()
        .order_status(&order.order_number)
        .await
        .unwrap()
        .unwrap();
    assert!(summary.awaiting_pop_review);

    let order = office.approve_pop(&order.id, Some(order.version)).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.status, OrderStatus::PaymentReceived);
}

#[tokio::test]
async fn test_credit_limit_blocks_order() {
    let (office, _clock) = setup().await;
    let account = office
        .create_customer(NewCustomer {
            name: "Karoo Builders".to_string(),
            email: "accounts@karoo.test".to_string(),
            payment_terms_days: Some(30),
            credit_limit: Some(Money::from_cents(100_000)),
            ..Default::default()
        })
        .await
        .unwrap();
    let bolt = product(&office, "FIX-HEX-001", 10_000, 100).await;

    let result = office
        .create_order(NewOrder {
            customer_id: account.id.clone(),
            lines: vec![LineItemInput::for_product(&bolt, 10)],
            payment_method: PaymentMethod::CreditAccount,
            ..Default::default()
        })
        .await;
    assert_eq!(code(result), ErrorCode::CreditLimitExceeded);

    let small = office
        .create_order(NewOrder {
            customer_id: account.id,
            lines: vec![LineItemInput::for_product(&bolt, 5)],
            payment_method: PaymentMethod::CreditAccount,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(small.totals.total, Money::from_cents(57_500));
}

#[tokio::test]
async fn test_unknown_references() {
    let (office, _clock) = setup().await;
    let customer = customer(&office, "refs@example.test").await;

    let result = office
        .create_order(NewOrder {
            customer_id: customer.id,
            lines: vec![LineItemInput {
                product_id: Some("missing-product".to_string()),
                description: "Ghost".to_string(),
                sku: None,
                quantity: 1,
                unit_price: Money::from_cents(100),
            }],
            ..Default::default()
        })
        .await;
    assert_eq!(code(result), ErrorCode::NotFound);
    assert_eq!(code(office.get_order("missing").await), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_corrupted_total_is_internal() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;

    sqlx::query("UPDATE orders SET total_cents = total_cents + 1 WHERE id = ?")
        .bind(&order.id)
        .execute(office.database().pool())
        .await
        .unwrap();

    assert_eq!(code(office.get_order(&order.id).await), ErrorCode::Internal);
}

// =============================================================================
// Purchase Orders
// =============================================================================

async fn sent_po(office: &BackOffice, product: &Product, quantity: i64) -> PurchaseOrder {
    let supplier = office
        .create_supplier(NewSupplier {
            name: "Highveld Fasteners".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let po = office
        .create_purchase_order(NewPurchaseOrder {
            supplier_id: supplier.id,
            lines: vec![LineItemInput::for_product(product, quantity)],
            order_date: None,
            expected_date: None,
            notes: None,
        })
        .await
        .unwrap();
    assert_eq!(po.status, PoStatus::Draft);
    office
        .transition_po_status(&po.id, PoStatus::Sent, Some(po.version))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_receive_in_two_deliveries() {
    let (office, _clock) = setup().await;
    let bracket = product(&office, "BRK-ANG-001", 2_500, 0).await;
    let po = sent_po(&office, &bracket, 50).await;
    let line_id = po.lines[0].line.id.clone();

    let po = office
        .receive_stock(
            &po.id,
            vec![ReceivingLine {
                po_line_item_id: line_id.clone(),
                quantity_received_now: 30,
                quantity_accepted: 28,
                quantity_rejected: 2,
                rejection_reason: Some("damaged".to_string()),
            }],
            Some("First pallet".to_string()),
            Some(po.version),
        )
        .await
        .unwrap();
    assert_eq!(po.lines[0].quantity_received, 30);
    assert_eq!(po.status, PoStatus::Partial);
    assert_eq!(office.get_product(&bracket.id).await.unwrap().stock_quantity, 28);

    let po = office
        .receive_all_remaining(&po.id, None, Some(po.version))
        .await
        .unwrap();
    assert_eq!(po.lines[0].quantity_received, 50);
    assert_eq!(po.status, PoStatus::Received);
    assert_eq!(office.get_product(&bracket.id).await.unwrap().stock_quantity, 48);

    let stored = office.get_purchase_order(&po.id).await.unwrap();
    assert_eq!(stored.receipts.len(), 2);
    assert_eq!(stored.lines[0].quantity_received, 50);
}

#[tokio::test]
async fn test_split_mismatch_leaves_po_unchanged() {
    let (office, _clock) = setup().await;
    let bracket = product(&office, "BRK-ANG-001", 2_500, 5).await;
    let po = sent_po(&office, &bracket, 50).await;
    let before = serde_json::to_value(office.get_purchase_order(&po.id).await.unwrap()).unwrap();

    let result = office
        .receive_stock(
            &po.id,
            vec![ReceivingLine {
                po_line_item_id: po.lines[0].line.id.clone(),
                quantity_received_now: 10,
                quantity_accepted: 7,
                quantity_rejected: 2,
                rejection_reason: Some("damaged".to_string()),
            }],
            None,
            None,
        )
        .await;
    assert_eq!(code(result), ErrorCode::SplitMismatch);

    let after = serde_json::to_value(office.get_purchase_order(&po.id).await.unwrap()).unwrap();
    assert_eq!(before, after);
    assert_eq!(office.get_product(&bracket.id).await.unwrap().stock_quantity, 5);
}

#[tokio::test]
async fn test_draft_po_cannot_receive() {
    let (office, _clock) = setup().await;
    let bracket = product(&office, "BRK-ANG-001", 2_500, 0).await;
    let supplier = office
        .create_supplier(NewSupplier {
            name: "Cape Fittings".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let po = office
        .create_purchase_order(NewPurchaseOrder {
            supplier_id: supplier.id,
            lines: vec![LineItemInput::for_product(&bracket, 5)],
            order_date: None,
            expected_date: None,
            notes: None,
        })
        .await
        .unwrap();

    assert_eq!(
        code(office.receive_all_remaining(&po.id, None, None).await),
        ErrorCode::InvalidTransition
    );
}

// =============================================================================
// Sweep, Outbox, Lookup, Report
// =============================================================================

#[tokio::test]
async fn test_quote_sweep_is_idempotent() {
    let (office, clock) = setup().await;
    let customer = customer(&office, "sweep@example.test").await;
    let bolt = product(&office, "FIX-HEX-001", 10_000, 100).await;
    let quote = office
        .create_quote(NewQuote {
            customer_id: Some(customer.id),
            contact: None,
            lines: vec![LineItemInput::for_product(&bolt, 1)],
            valid_until: clock.now().date_naive() + Duration::days(7),
            requested_by_customer: true,
            notes: None,
        })
        .await
        .unwrap();

    assert!(office.expire_quotes().await.unwrap().is_empty());

    clock.advance(Duration::days(8));
    let lookup = office.lookup();
    let summary = lookup.quote_status(&quote.quote_number).await.unwrap().unwrap();
    assert!(summary.lapsed);
    assert_eq!(summary.status, QuoteStatus::Pending);

    let expired = office.expire_quotes().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status, QuoteStatus::Expired);
    assert!(office.expire_quotes().await.unwrap().is_empty());

    let summary = lookup.quote_status(&quote.quote_number).await.unwrap().unwrap();
    assert!(!summary.lapsed);
    assert_eq!(summary.status, QuoteStatus::Expired);
}

#[tokio::test]
async fn test_status_changes_reach_outbox() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;
    office
        .transition_order_status(&order.id, OrderStatus::Confirmed, Some(order.version))
        .await
        .unwrap();

    let outbox = office.events();
    let pending = outbox.pending(10).await.unwrap();
    let topics: Vec<String> = pending.iter().map(|e| e.topic()).collect();
    assert_eq!(topics, vec!["ORDER_CREATED", "ORDER_STATUS_CHANGED"]);

    let change = &pending[1];
    assert_eq!(change.document_number, order.order_number);
    assert_eq!(change.from_status.as_deref(), Some("PENDING"));
    assert_eq!(change.to_status.as_deref(), Some("CONFIRMED"));
    assert_eq!(change.payload["status"], "CONFIRMED");

    outbox.mark_dispatched(&pending[0].id).await.unwrap();
    assert_eq!(outbox.count_pending().await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_operation_writes_no_event() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;
    let before = office.events().count_pending().await.unwrap();

    let _ = office
        .transition_order_status(&order.id, OrderStatus::Delivered, None)
        .await;
    assert_eq!(office.events().count_pending().await.unwrap(), before);
}

#[tokio::test]
async fn test_product_lookup_normalizes_sku() {
    let (office, _clock) = setup().await;
    product(&office, "PLM-BAL-004", 8_999, 3).await;

    let found = office.lookup().product(" plm-bal-004 ").await.unwrap().unwrap();
    assert_eq!(found.sku, "PLM-BAL-004");
    assert!(found.can_supply(3));
    assert!(!found.can_supply(4));

    assert!(office.lookup().product("NOPE-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_report_counts_paid_orders() {
    let (office, _clock) = setup().await;
    let order = order(&office).await;
    let invoice = office
        .generate_invoice_from_order(&order.id, InvoiceOptions::default())
        .await
        .unwrap();
    let invoice = office.send_invoice(&invoice.id, None).await.unwrap();

    let report = office.get_report(30).await.unwrap();
    assert_eq!(report.order_count, 1);
    assert_eq!(report.revenue, Money::zero());
    assert_eq!(report.invoices.outstanding_amount, Money::from_cents(115_000));

    office
        .apply_payment(&invoice.id, Money::from_cents(115_000), PaymentMethod::Card, None, None)
        .await
        .unwrap();

    let report = office.get_report(30).await.unwrap();
    assert_eq!(report.revenue, Money::from_cents(115_000));
    assert_eq!(report.revenue_order_count, 1);
    assert_eq!(report.invoices.outstanding_count, 0);
}

#[tokio::test]
async fn test_report_period_is_bounded() {
    let (office, _clock) = setup().await;

    assert_eq!(code(office.get_report(0).await), ErrorCode::Validation);
    assert_eq!(
        code(office.get_report(keystone_core::report::MAX_PERIOD_DAYS + 1).await),
        ErrorCode::Validation
    );
    assert!(office.get_report(keystone_core::report::MAX_PERIOD_DAYS).await.is_ok());
}

// =============================================================================
// Racing Writers
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_payments_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let office = setup_file(&dir).await;
    let order = order(&office).await;
    let invoice = office
        .generate_invoice_from_order(&order.id, InvoiceOptions::default())
        .await
        .unwrap();
    let invoice = office.send_invoice(&invoice.id, None).await.unwrap();

    let pay = |office: BackOffice, id: String, version: i64| {
        tokio::spawn(async move {
            office
                .apply_payment(
                    &id,
                    Money::from_cents(100_000),
                    PaymentMethod::BankTransfer,
                    None,
                    Some(version),
                )
                .await
        })
    };
    let (first, second) = tokio::join!(
        pay(office.clone(), invoice.id.clone(), invoice.version),
        pay(office.clone(), invoice.id.clone(), invoice.version),
    );
    let results = [first.unwrap(), second.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(loser.code(), ErrorCode::ConcurrentModification);

    let stored = office.get_invoice(&invoice.id).await.unwrap();
    assert_eq!(stored.payments.len(), 1);
    assert_eq!(stored.amount_paid(), Money::from_cents(100_000));
    assert_eq!(stored.status, InvoiceStatus::PartiallyPaid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_receipts_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let office = setup_file(&dir).await;
    let bracket = product(&office, "BRK-ANG-001", 2_500, 0).await;
    let po = sent_po(&office, &bracket, 50).await;
    let line_id = po.lines[0].line.id.clone();

    let receive = |office: BackOffice, id: String, line_id: String, version: i64| {
        tokio::spawn(async move {
            office
                .receive_stock(
                    &id,
                    vec![ReceivingLine {
                        po_line_item_id: line_id,
                        quantity_received_now: 30,
                        quantity_accepted: 30,
                        quantity_rejected: 0,
                        rejection_reason: None,
                    }],
                    None,
                    Some(version),
                )
                .await
        })
    };
    let (first, second) = tokio::join!(
        receive(office.clone(), po.id.clone(), line_id.clone(), po.version),
        receive(office.clone(), po.id.clone(), line_id.clone(), po.version),
    );
    let results = [first.unwrap(), second.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(loser.code(), ErrorCode::ConcurrentModification);

    let stored = office.get_purchase_order(&po.id).await.unwrap();
    assert_eq!(stored.lines[0].quantity_received, 30);
    assert_eq!(stored.receipts.len(), 1);
    assert_eq!(office.get_product(&bracket.id).await.unwrap().stock_quantity, 30);
}
