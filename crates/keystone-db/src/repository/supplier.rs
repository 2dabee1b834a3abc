//! # Supplier Repository

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use keystone_core::Supplier;

use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct SupplierRow {
    id: String,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<SupplierRow> for Supplier {
    fn from(row: SupplierRow) -> Self {
        Supplier {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            created_at: row.created_at,
        }
    }
}

pub struct SupplierRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SupplierRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SupplierRepository { conn }
    }

    pub async fn insert(&mut self, supplier: &Supplier) -> DbResult<()> {
        debug!(id = %supplier.id, name = %supplier.name, "Inserting supplier");

        sqlx::query(
            "INSERT INTO suppliers (id, name, email, phone, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&supplier.id)
        .bind(&supplier.name)
        .bind(&supplier.email)
        .bind(&supplier.phone)
        .bind(supplier.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Supplier> {
        let row: Option<SupplierRow> = sqlx::query_as(
            "SELECT id, name, email, phone, created_at FROM suppliers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(Supplier::from)
            .ok_or_else(|| DbError::not_found("Supplier", id))
    }
}
