//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  KeystoneConfig::db_config()  /  DbConfig::in_memory()                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await                                           │
//! │       │  WAL, foreign keys, busy timeout                               │
//! │       ├── run_migrations = true  → apply pending migrations            │
//! │       └── run_migrations = false → refuse a schema that is behind      │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  readers: Lookup, get_*, get_report      │                           │
//! │  │  writers: one BEGIN IMMEDIATE..COMMIT    │                           │
//! │  │           per BackOffice operation       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! SQLite allows one writer at a time. A second writer (the sweep binary
//! running next to a service, say) waits up to `busy_timeout` for the lock
//! instead of failing with `SQLITE_BUSY` straight away.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations::{self, MigrationStatus};

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/keystone/keystone.db")
///     .max_connections(5)
///     .busy_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file path, or `:memory:`.
    pub database_path: PathBuf,

    /// Default: 5
    pub max_connections: u32,

    /// Default: 1
    pub min_connections: u32,

    /// How long to wait for a pooled connection. Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle time before a pooled connection is closed. Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long a writer waits on the SQLite write lock. Default: 5 seconds
    pub busy_timeout: Duration,

    /// Apply pending migrations on connect. Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// A private in-memory database, migrated on connect.
    ///
    /// The pool holds exactly one connection: every new `:memory:`
    /// connection would otherwise open its own empty database.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(1),
            run_migrations: true,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == ":memory:"
    }
}

// =============================================================================
// Health
// =============================================================================

/// Snapshot for startup logs and health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbHealth {
    pub reachable: bool,
    pub schema: MigrationStatus,
    /// Outbox rows not yet handed to a dispatcher.
    pub pending_events: i64,
}

// =============================================================================
// Database
// =============================================================================

/// Connection pool handle.
///
/// Cloning is cheap; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and brings the schema up to date.
    ///
    /// With `run_migrations` off, a database with pending migrations fails
    /// with [`DbError::MigrationFailed`] instead of opening.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            in_memory = config.is_in_memory(),
            "Initializing database connection"
        );

        let connect_url = if config.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", config.database_path.display())
        };

        let mut connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .synchronous(SqliteSynchronous::Normal)
            // Off by default in SQLite
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);
        if !config.is_in_memory() {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        debug!(busy_timeout = ?config.busy_timeout, "Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "Database pool created");

        let db = Database { pool };
        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        } else {
            migrations::ensure_current(&db.pool).await?;
        }

        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a transaction that takes the SQLite write lock up front.
    ///
    /// Rows loaded inside it are the latest committed ones, and a writer that
    /// cannot get the lock within `busy_timeout` fails with
    /// [`DbError::ConcurrentModification`].
    pub async fn begin_write(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// After calling close, all operations fail.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    pub async fn health(&self) -> DbResult<DbHealth> {
        let reachable = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        if !reachable {
            return Err(DbError::ConnectionFailed("database did not answer".into()));
        }

        let schema = migrations::migration_status(&self.pool).await?;
        let pending_events: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_events WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(DbHealth {
            reachable,
            schema,
            pending_events,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
