//! # Database Error Types
//!
//! Error types for database operations, and the [`EngineError`] every
//! `BackOffice` operation returns.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)          Rule violation (CoreError)        │
//! │       │                                     │                           │
//! │       ▼                                     │                           │
//! │  DbError (this module)                      │                           │
//! │       │                                     │                           │
//! │       └──────────────┬──────────────────────┘                           │
//! │                      ▼                                                  │
//! │               EngineError ──code()──► ErrorCode                         │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │  Presentation collaborator translates the code into a message          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use keystone_core::{CoreError, InvariantViolation, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Database operation errors.
///
/// These errors wrap sqlx errors and provide additional context
/// for debugging and user feedback.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - ID or document number doesn't exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting duplicate SKU or customer email
    /// - A second invoice for the same order
    /// - Any UNIQUE index violation
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - A line referencing a product that does not exist
    /// - A document referencing a missing customer or supplier
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// The row's version moved on since it was read.
    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: String, id: String },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file doesn't exist and can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored value could not be decoded (e.g., malformed JSON column).
    #[error("Corrupt {column} column: {reason}")]
    Decode { column: String, reason: String },

    /// Stored totals disagree with a recomputation from stored lines.
    #[error("Stored data failed verification: {0}")]
    Invariant(#[from] InvariantViolation),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn concurrent(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::ConcurrentModification {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn decode(column: impl Into<String>, reason: impl ToString) -> Self {
        DbError::Decode {
            column: column.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Busy codes, then message for constraint type
/// sqlx::Error::ColumnDecode   → DbError::Decode
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLITE_BUSY and SQLITE_BUSY_SNAPSHOT: another writer holds the lock
                if matches!(db_err.code().as_deref(), Some("5") | Some("517")) {
                    return DbError::ConcurrentModification {
                        entity: "Database".to_string(),
                        id: "write lock".to_string(),
                    };
                }

                // SQLite error messages for constraints:
                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if let Some(field) = msg.split("UNIQUE constraint failed: ").nth(1) {
                    DbError::UniqueViolation {
                        field: field.to_string(),
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::ColumnDecode { index, source } => DbError::Decode {
                column: index,
                reason: source.to_string(),
            },

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Engine Error
// =============================================================================

/// Machine-readable error kind for presentation collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidTransition,
    DocumentLocked,
    InvalidAmount,
    OverApplication,
    InvoiceLocked,
    OverReceipt,
    SplitMismatch,
    MissingReason,
    EmptyReceipt,
    QuoteExpired,
    AlreadyConverted,
    AlreadyInvoiced,
    ConcurrentModification,
    NotFound,
    Validation,
    CreditLimitExceeded,
    Duplicate,
    Storage,
    Internal,
}

/// The error every `BackOffice` operation returns.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Core(err) => match err {
                CoreError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                CoreError::DocumentLocked { .. } => ErrorCode::DocumentLocked,
                CoreError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                CoreError::OverApplication { .. } => ErrorCode::OverApplication,
                CoreError::InvoiceLocked { .. } => ErrorCode::InvoiceLocked,
                CoreError::OverReceipt { .. } => ErrorCode::OverReceipt,
                CoreError::SplitMismatch { .. } => ErrorCode::SplitMismatch,
                CoreError::MissingReason { .. } => ErrorCode::MissingReason,
                CoreError::EmptyReceipt => ErrorCode::EmptyReceipt,
                CoreError::QuoteExpired { .. } => ErrorCode::QuoteExpired,
                CoreError::AlreadyConverted { .. } => ErrorCode::AlreadyConverted,
                CoreError::AlreadyInvoiced { .. } => ErrorCode::AlreadyInvoiced,
                CoreError::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
                CoreError::NotFound { .. } => ErrorCode::NotFound,
                CoreError::Validation(ValidationError::CreditLimitExceeded { .. }) => {
                    ErrorCode::CreditLimitExceeded
                }
                CoreError::Validation(ValidationError::Duplicate { .. }) => ErrorCode::Duplicate,
                CoreError::Validation(_) => ErrorCode::Validation,
                CoreError::Internal(_) => ErrorCode::Internal,
            },
            EngineError::Db(err) => match err {
                DbError::NotFound { .. } => ErrorCode::NotFound,
                DbError::UniqueViolation { .. } => ErrorCode::Duplicate,
                DbError::ForeignKeyViolation { .. } => ErrorCode::NotFound,
                DbError::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
                DbError::Decode { .. } | DbError::Invariant(_) | DbError::Internal(_) => {
                    ErrorCode::Internal
                }
                DbError::ConnectionFailed(_)
                | DbError::MigrationFailed(_)
                | DbError::QueryFailed(_)
                | DbError::TransactionFailed(_)
                | DbError::PoolExhausted => ErrorCode::Storage,
            },
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Db(err.into())
    }
}

/// Result type for `BackOffice` operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::Money;

    #[test]
    fn test_error_codes() {
        let err: EngineError = CoreError::OverApplication {
            amount: Money::from_cents(100),
            amount_due: Money::zero(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::OverApplication);

        let err: EngineError = DbError::concurrent("Order", "ord-1").into();
        assert_eq!(err.code(), ErrorCode::ConcurrentModification);

        let err: EngineError = ValidationError::required("name").into();
        assert_eq!(err.code(), ErrorCode::Validation);
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::AlreadyInvoiced).unwrap();
        assert_eq!(json, "\"ALREADY_INVOICED\"");
    }
}
