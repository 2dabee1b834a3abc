//! # Reporting
//!
//! Sales report over a trailing period, folded from documents.
//!
//! Nothing here is stored. Every figure can be re-derived from the orders,
//! invoices and customers passed in.
//!
//! ## Revenue Rule
//! An order counts towards revenue when it was created in the period, is
//! not CANCELLED, and is either paid or DELIVERED.
//!
//! ## Bucket Size
//! | Period       | Bucket                      |
//! |--------------|-----------------------------|
//! | ≤ 31 days    | day                         |
//! | ≤ 186 days   | ISO week (starting Monday)  |
//! | longer       | calendar month              |

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::money::Money;
use crate::order::{Order, OrderStatus};
use crate::types::Customer;

/// Longest period a report may cover (ten years).
pub const MAX_PERIOD_DAYS: u32 = 3660;

/// Accepts 1 through [`MAX_PERIOD_DAYS`].
pub fn validate_period_days(period_days: u32) -> Result<(), ValidationError> {
    if period_days == 0 || period_days > MAX_PERIOD_DAYS {
        return Err(ValidationError::OutOfRange {
            field: "period_days".to_string(),
            min: 1,
            max: i64::from(MAX_PERIOD_DAYS),
        });
    }
    Ok(())
}

// =============================================================================
// Report Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BucketSize {
    Day,
    Week,
    Month,
}

impl BucketSize {
    pub fn for_period(period_days: u32) -> Self {
        match period_days {
            0..=31 => BucketSize::Day,
            32..=186 => BucketSize::Week,
            _ => BucketSize::Month,
        }
    }

    /// First day of the bucket containing `date`.
    fn start_of(self, date: NaiveDate) -> NaiveDate {
        match self {
            BucketSize::Day => date,
            BucketSize::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            BucketSize::Month => date.with_day(1).unwrap_or(date),
        }
    }

    fn next(self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            BucketSize::Day => start.succ_opt(),
            BucketSize::Week => start.checked_add_signed(Duration::days(7)),
            BucketSize::Month => start.checked_add_months(Months::new(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RevenueBucket {
    #[ts(as = "String")]
    pub start: NaiveDate,
    pub revenue: Money,
    pub order_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    /// Product id, or the sku (then description) of a custom line.
    pub key: String,
    pub product_id: Option<String>,
    pub description: String,
    pub quantity: i64,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSpend {
    pub customer_id: String,
    pub name: Option<String>,
    pub order_count: u32,
    pub total: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: u32,
}

/// Receivables across all non-cancelled invoices, whatever their age.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub outstanding_count: u32,
    pub outstanding_amount: Money,
    pub overdue_count: u32,
    pub overdue_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub period_days: u32,
    #[ts(as = "String")]
    pub period_start: DateTime<Utc>,
    #[ts(as = "String")]
    pub period_end: DateTime<Utc>,
    pub revenue: Money,
    /// All orders created in the period.
    pub order_count: u32,
    /// Orders that contributed to revenue.
    pub revenue_order_count: u32,
    pub new_customer_count: u32,
    /// revenue / revenue_order_count, truncated to the cent.
    pub average_order_value: Money,
    pub bucket_size: BucketSize,
    pub buckets: Vec<RevenueBucket>,
    pub top_products: Vec<ProductSales>,
    pub top_customers: Vec<CustomerSpend>,
    pub status_counts: Vec<StatusCount>,
    pub invoices: InvoiceSummary,
}

// =============================================================================
// Report Builder
// =============================================================================

impl Report {
    /// Folds the report for the `period_days` ending at `now`.
    pub fn build(
        period_days: u32,
        now: DateTime<Utc>,
        orders: &[Order],
        invoices: &[Invoice],
        customers: &[Customer],
        top_n: usize,
    ) -> CoreResult<Report> {
        validate_period_days(period_days)?;

        let period_start = now - Duration::days(i64::from(period_days));
        let in_period = |at: DateTime<Utc>| at >= period_start && at <= now;
        let period_orders: Vec<&Order> = orders.iter().filter(|o| in_period(o.created_at)).collect();
        let revenue_orders: Vec<&Order> =
            period_orders.iter().copied().filter(|o| o.is_revenue()).collect();

        let revenue: Money = revenue_orders.iter().map(|o| o.totals.total).sum();
        let revenue_order_count = revenue_orders.len() as u32;
        let average_order_value = if revenue_order_count == 0 {
            Money::zero()
        } else {
            Money::from_cents(revenue.cents() / i64::from(revenue_order_count))
        };

        let bucket_size = BucketSize::for_period(period_days);

        Ok(Report {
            period_days,
            period_start,
            period_end: now,
            revenue,
            order_count: period_orders.len() as u32,
            revenue_order_count,
            new_customer_count: customers.iter().filter(|c| in_period(c.created_at)).count()
                as u32,
            average_order_value,
            bucket_size,
            buckets: revenue_buckets(bucket_size, period_start, now, &revenue_orders),
            top_products: top_products(&period_orders, top_n),
            top_customers: top_customers(&revenue_orders, customers, top_n),
            status_counts: status_counts(&period_orders),
            invoices: invoice_summary(invoices, now.date_naive()),
        })
    }
}

fn revenue_buckets(
    size: BucketSize,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    revenue_orders: &[&Order],
) -> Vec<RevenueBucket> {
    let mut buckets: BTreeMap<NaiveDate, (Money, u32)> = BTreeMap::new();

    let last = size.start_of(end.date_naive());
    let mut cursor = Some(size.start_of(start.date_naive()));
    while let Some(day) = cursor.filter(|d| *d <= last) {
        buckets.insert(day, (Money::zero(), 0));
        cursor = size.next(day);
    }

    for order in revenue_orders {
        let entry = buckets
            .entry(size.start_of(order.created_at.date_naive()))
            .or_insert((Money::zero(), 0));
        entry.0 += order.totals.total;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(start, (revenue, order_count))| RevenueBucket {
            start,
            revenue,
            order_count,
        })
        .collect()
}

fn top_products(orders: &[&Order], top_n: usize) -> Vec<ProductSales> {
    let mut sales: HashMap<String, ProductSales> = HashMap::new();

    for order in orders.iter().filter(|o| o.status != OrderStatus::Cancelled) {
        for line in &order.lines {
            let key = line
                .product_id
                .clone()
                .or_else(|| line.sku.clone())
                .unwrap_or_else(|| line.description.clone());
            let entry = sales.entry(key.clone()).or_insert_with(|| ProductSales {
                key,
                product_id: line.product_id.clone(),
                description: line.description.clone(),
                quantity: 0,
                revenue: Money::zero(),
            });
            entry.quantity += line.quantity;
            entry.revenue += line.line_total();
        }
    }

    let mut ranked: Vec<ProductSales> = sales.into_values().collect();
    ranked.sort_by(|a, b| b.quantity.cmp(&a.quantity).then_with(|| a.key.cmp(&b.key)));
    ranked.truncate(top_n);
    ranked
}

fn top_customers(revenue_orders: &[&Order], customers: &[Customer], top_n: usize) -> Vec<CustomerSpend> {
    let names: HashMap<&str, &str> = customers
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();
    let mut spend: HashMap<&str, (u32, Money)> = HashMap::new();

    for order in revenue_orders {
        let entry = spend
            .entry(order.customer_id.as_str())
            .or_insert((0, Money::zero()));
        entry.0 += 1;
        entry.1 += order.totals.total;
    }

    let mut ranked: Vec<CustomerSpend> = spend
        .into_iter()
        .map(|(customer_id, (order_count, total))| CustomerSpend {
            customer_id: customer_id.to_string(),
            name: names.get(customer_id).map(|n| n.to_string()),
            order_count,
            total,
        })
        .collect();
    ranked.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.customer_id.cmp(&b.customer_id)));
    ranked.truncate(top_n);
    ranked
}

fn status_counts(orders: &[&Order]) -> Vec<StatusCount> {
    OrderStatus::ALL
        .into_iter()
        .map(|status| StatusCount {
            status,
            count: orders.iter().filter(|o| o.status == status).count() as u32,
        })
        .filter(|s| s.count > 0)
        .collect()
}

fn invoice_summary(invoices: &[Invoice], today: NaiveDate) -> InvoiceSummary {
    let mut summary = InvoiceSummary::default();

    for invoice in invoices {
        let status = InvoiceStatus::derive(
            invoice.sent_at.is_some(),
            invoice.cancelled_at.is_some(),
            invoice.amount_paid(),
            invoice.totals.total,
            invoice.due_date,
            today,
        );
        if !status.is_outstanding() {
            continue;
        }

        let due = invoice.amount_due();
        summary.outstanding_count += 1;
        summary.outstanding_amount += due;
        if status == InvoiceStatus::Overdue {
            summary.overdue_count += 1;
            summary.overdue_amount += due;
        }
    }
    summary
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceDraft;
    use crate::line_item::{LineItem, LineItemInput};
    use crate::money::TaxRate;
    use crate::order::PaymentStatus;
    use crate::types::LedgerSettings;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 31, 18, 0, 0).unwrap()
    }

    fn order(id: &str, customer: &str, days_ago: i64, qty: i64, paid: bool) -> Order {
        let line = LineItem::from_input(LineItemInput {
            product_id: Some("prod-widget".to_string()),
            description: "Widget".to_string(),
            sku: Some("WID-1".to_string()),
            quantity: qty,
            unit_price: Money::from_cents(10_000),
        })
        .unwrap();
        let mut order = Order::new(
            id.to_string(),
            format!("ORD-2026-{}", id),
            customer.to_string(),
            vec![line],
            &LedgerSettings::default(),
            now() - Duration::days(days_ago),
        )
        .unwrap();
        if paid {
            order.payment_status = PaymentStatus::Paid;
        }
        order
    }

    fn customer(id: &str, name: &str, days_ago: i64) -> Customer {
        Customer {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@example.test", id),
            phone: None,
            company: None,
            payment_terms_days: None,
            credit_limit: None,
            default_address: None,
            created_at: now() - Duration::days(days_ago),
        }
    }

    #[test]
    fn test_revenue_counts_paid_and_delivered_only() {
        let mut delivered = order("00002", "c-2", 3, 1, false);
        delivered.status = OrderStatus::Delivered;
        let mut cancelled_paid = order("00003", "c-1", 2, 5, true);
        cancelled_paid.status = OrderStatus::Cancelled;
        let orders = vec![
            order("00001", "c-1", 1, 10, true), // 1150.00
            delivered,                          // 115.00
            cancelled_paid,
            order("00004", "c-3", 4, 2, false),  // unpaid
            order("00005", "c-1", 60, 9, true), // outside period
        ];
        let customers = vec![customer("c-1", "Acme", 100), customer("c-2", "Bolt", 5)];

        let report = Report::build(30, now(), &orders, &[], &customers, 5).unwrap();

        assert_eq!(report.revenue.to_string(), "1265.00");
        assert_eq!(report.order_count, 4);
        assert_eq!(report.revenue_order_count, 2);
        assert_eq!(report.average_order_value.to_string(), "632.50");
        assert_eq!(report.new_customer_count, 1);
        assert_eq!(report.bucket_size, BucketSize::Day);
        assert_eq!(report.buckets.len(), 31);
        assert_eq!(report.buckets.iter().map(|b| b.revenue).sum::<Money>(), report.revenue);

        assert_eq!(report.top_customers[0].customer_id, "c-1");
        assert_eq!(report.top_customers[0].name.as_deref(), Some("Acme"));

        // cancelled orders do not count as sold
        assert_eq!(report.top_products[0].quantity, 13);
        assert_eq!(report.top_products[0].key, "prod-widget");

        let cancelled = report
            .status_counts
            .iter()
            .find(|s| s.status == OrderStatus::Cancelled)
            .unwrap();
        assert_eq!(cancelled.count, 1);
    }

    #[test]
    fn test_bucket_sizes() {
        assert_eq!(BucketSize::for_period(31), BucketSize::Day);
        assert_eq!(BucketSize::for_period(32), BucketSize::Week);
        assert_eq!(BucketSize::for_period(186), BucketSize::Week);
        assert_eq!(BucketSize::for_period(365), BucketSize::Month);

        let report = Report::build(90, now(), &[], &[], &[], 5).unwrap();
        for bucket in &report.buckets {
            assert_eq!(bucket.start.weekday(), chrono::Weekday::Mon);
        }

        let report = Report::build(365, now(), &[], &[], &[], 5).unwrap();
        assert!(report.buckets.iter().all(|b| b.start.day() == 1));
        assert_eq!(report.buckets.len(), 13);
    }

    #[test]
    fn test_invoice_summary() {
        let line = LineItem::from_input(LineItemInput::custom("Work", 1, Money::from_cents(10_000)))
            .unwrap();
        let draft = InvoiceDraft {
            customer_id: "c-1".to_string(),
            order_id: None,
            lines: vec![line],
            discount: Money::zero(),
            payment_terms_days: 30,
            due_date: None,
            notes: None,
        };
        let issued = now() - Duration::days(45);
        let mut overdue = Invoice::new("i-1".into(), "INV-2026-00001".into(), draft.clone(), TaxRate::STANDARD_VAT, issued).unwrap();
        overdue.send(issued).unwrap();
        let mut current = Invoice::new("i-2".into(), "INV-2026-00002".into(), draft.clone(), TaxRate::STANDARD_VAT, now()).unwrap();
        current.send(now()).unwrap();
        let draft_only = Invoice::new("i-3".into(), "INV-2026-00003".into(), draft, TaxRate::STANDARD_VAT, now()).unwrap();

        let summary = invoice_summary(&[overdue, current, draft_only], now().date_naive());
        assert_eq!(summary.outstanding_count, 2);
        assert_eq!(summary.outstanding_amount.cents(), 23_000);
        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.overdue_amount.cents(), 11_500);
    }

    #[test]
    fn test_period_bounds() {
        assert!(Report::build(0, now(), &[], &[], &[], 5).is_err());
        assert!(Report::build(MAX_PERIOD_DAYS + 1, now(), &[], &[], &[], 5).is_err());
    }
}
