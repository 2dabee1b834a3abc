//! # Customer Repository
//!
//! Customer accounts and the credit exposure used by credit-account orders.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use keystone_core::{Address, Customer, Money, OrderStatus, PaymentMethod, PaymentStatus};

use super::{from_json, to_json};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: String,
    name: String,
    email: String,
    phone: Option<String>,
    company: Option<String>,
    payment_terms_days: Option<i64>,
    credit_limit_cents: Option<i64>,
    default_address: Option<String>,
    created_at: DateTime<Utc>,
}

impl CustomerRow {
    fn into_customer(self) -> DbResult<Customer> {
        let payment_terms_days = self
            .payment_terms_days
            .map(|d| u32::try_from(d).map_err(|e| DbError::decode("payment_terms_days", e)))
            .transpose()?;

        Ok(Customer {
            id: self.id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            company: self.company,
            payment_terms_days,
            credit_limit: self.credit_limit_cents.map(Money::from_cents),
            default_address: from_json::<Address>("default_address", self.default_address)?,
            created_at: self.created_at,
        })
    }
}

const SELECT_CUSTOMER: &str = "SELECT id, name, email, phone, company, payment_terms_days, \
     credit_limit_cents, default_address, created_at FROM customers";

/// Repository for customer database operations.
pub struct CustomerRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> CustomerRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        CustomerRepository { conn }
    }

    pub async fn insert(&mut self, customer: &Customer) -> DbResult<()> {
        debug!(id = %customer.id, email = %customer.email, "Inserting customer");

        let result = sqlx::query(
            r#"
            INSERT INTO customers (
                id, name, email, phone, company, payment_terms_days,
                credit_limit_cents, default_address, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.company)
        .bind(customer.payment_terms_days.map(i64::from))
        .bind(customer.credit_limit.map(|m| m.cents()))
        .bind(to_json("default_address", customer.default_address.as_ref())?)
        .bind(customer.created_at)
        .execute(&mut *self.conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match DbError::from(err) {
                DbError::UniqueViolation { .. } => Err(DbError::duplicate("email", &customer.email)),
                other => Err(other),
            },
        }
    }

    pub async fn find(&mut self, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("{SELECT_CUSTOMER} WHERE id = ?");
        let row: Option<CustomerRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.map(CustomerRow::into_customer).transpose()
    }

    /// Like [`find`](Self::find) but a missing customer is an error.
    pub async fn get(&mut self, id: &str) -> DbResult<Customer> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", id))
    }

    pub async fn list(&mut self) -> DbResult<Vec<Customer>> {
        let sql = format!("{SELECT_CUSTOMER} ORDER BY created_at");
        let rows: Vec<CustomerRow> = sqlx::query_as(&sql).fetch_all(&mut *self.conn).await?;
        rows.into_iter().map(CustomerRow::into_customer).collect()
    }

    /// Unpaid total of the customer's live credit-account orders.
    ///
    /// `excluding` leaves one order out, so an order can be re-checked
    /// against the limit without counting itself twice.
    pub async fn credit_outstanding(
        &mut self,
        customer_id: &str,
        excluding: Option<&str>,
    ) -> DbResult<Money> {
        let cents: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total_cents), 0) FROM orders
            WHERE customer_id = ?
              AND payment_method = ?
              AND payment_status != ?
              AND status != ?
              AND id != COALESCE(?, '')
            "#,
        )
        .bind(customer_id)
        .bind(PaymentMethod::CreditAccount)
        .bind(PaymentStatus::Paid)
        .bind(OrderStatus::Cancelled)
        .bind(excluding)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(Money::from_cents(cents))
    }
}
