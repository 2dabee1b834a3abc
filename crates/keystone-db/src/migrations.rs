//! # Database Migrations
//!
//! The schema ships inside the binary. [`Database::new`](crate::Database::new)
//! applies it, or with migrations disabled, refuses to open a database whose
//! schema is behind.
//!
//! ## Schema
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  001_initial_schema.sql                                                 │
//! │                                                                         │
//! │  customers ─┬─► quotes ──► quote_line_items                             │
//! │             ├─► orders ──► order_line_items                             │
//! │             └─► invoices ─► invoice_line_items, payments                │
//! │  suppliers ───► purchase_orders ─► po_line_items                        │
//! │                        └─────────► receiving_events ─► receiving_lines  │
//! │  products (stock), document_sequences, document_events (outbox)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create `migrations/sqlite/NNN_description.sql` with the next number
//! 2. Use `IF NOT EXISTS` where possible
//! 3. **NEVER** modify an applied migration; add a new one

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::{DbError, DbResult};

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// How far the database schema has been migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub embedded: usize,
    pub applied: usize,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.embedded
    }

    pub fn pending(&self) -> usize {
        self.embedded.saturating_sub(self.applied)
    }
}

/// Applies every pending migration, each in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;

    let status = migration_status(pool).await?;
    info!(applied = status.applied, "Schema up to date");
    Ok(())
}

pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let has_table: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    let applied: i64 = if has_table == 0 {
        0
    } else {
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?
    };

    Ok(MigrationStatus {
        embedded: MIGRATOR.migrations.len(),
        applied: applied as usize,
    })
}

/// Fails with `MigrationFailed` when migrations are pending.
pub async fn ensure_current(pool: &SqlitePool) -> DbResult<()> {
    let status = migration_status(pool).await?;
    if status.is_current() {
        return Ok(());
    }

    warn!(pending = status.pending(), "Database schema is behind");
    Err(DbError::MigrationFailed(format!(
        "{} migration(s) pending; open with migrations enabled",
        status.pending()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn bare_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_is_behind() {
        let pool = bare_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.applied, 0);
        assert!(!status.is_current());
        assert!(matches!(
            ensure_current(&pool).await,
            Err(DbError::MigrationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = bare_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert!(status.is_current());
        assert_eq!(status.pending(), 0);
        ensure_current(&pool).await.unwrap();
    }
}
