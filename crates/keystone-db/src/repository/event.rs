//! # Document Event Outbox
//!
//! Status-change notifications for email and messaging collaborators.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BackOffice operation (e.g., apply_payment)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. UPDATE invoices SET status = 'PAID', version = version + 1  │   │
//! │  │  2. INSERT INTO document_events (INVOICE, PAYMENT_APPLIED, ...) │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← both land or neither does                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Dispatcher (outside the engine)                                       │
//! │    Outbox::pending(50)                                                 │
//! │    send ──► mark_dispatched(id)   or   mark_failed(id, error)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use keystone_core::{Clock, DocumentKind};

use crate::error::{DbError, DbResult};

// =============================================================================
// Event Types
// =============================================================================

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    StatusChanged,
    LinesUpdated,
    AddressUpdated,
    PaymentApplied,
    PopUploaded,
    PopApproved,
    PopRejected,
    StockReceived,
    Converted,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::StatusChanged => "STATUS_CHANGED",
            EventType::LinesUpdated => "LINES_UPDATED",
            EventType::AddressUpdated => "ADDRESS_UPDATED",
            EventType::PaymentApplied => "PAYMENT_APPLIED",
            EventType::PopUploaded => "POP_UPLOADED",
            EventType::PopApproved => "POP_APPROVED",
            EventType::PopRejected => "POP_REJECTED",
            EventType::StockReceived => "STOCK_RECEIVED",
            EventType::Converted => "CONVERTED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn kind_prefix(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Order => "ORDER",
        DocumentKind::Quote => "QUOTE",
        DocumentKind::Invoice => "INVOICE",
        DocumentKind::PurchaseOrder => "PURCHASE_ORDER",
    }
}

// =============================================================================
// Events
// =============================================================================

/// An event about to be written.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub document_kind: DocumentKind,
    pub document_id: String,
    pub document_number: String,
    pub event_type: EventType,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub payload: serde_json::Value,
}

impl NewEvent {
    /// Builds an event carrying a JSON snapshot of `document`.
    pub fn new<T: Serialize>(
        document_kind: DocumentKind,
        document_id: &str,
        document_number: &str,
        event_type: EventType,
        document: &T,
    ) -> DbResult<NewEvent> {
        let payload =
            serde_json::to_value(document).map_err(|e| DbError::decode("payload", e))?;
        Ok(NewEvent {
            document_kind,
            document_id: document_id.to_string(),
            document_number: document_number.to_string(),
            event_type,
            from_status: None,
            to_status: None,
            payload,
        })
    }

    pub fn status_change(mut self, from: impl fmt::Display, to: impl fmt::Display) -> Self {
        self.from_status = Some(from.to_string());
        self.to_status = Some(to.to_string());
        self
    }
}

/// A stored outbox row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEvent {
    pub id: String,
    pub document_kind: DocumentKind,
    pub document_id: String,
    pub document_number: String,
    pub event_type: EventType,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl DocumentEvent {
    /// Routing key for dispatchers, e.g. `ORDER_STATUS_CHANGED`.
    pub fn topic(&self) -> String {
        format!("{}_{}", kind_prefix(self.document_kind), self.event_type)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    document_kind: DocumentKind,
    document_id: String,
    document_number: String,
    event_type: EventType,
    from_status: Option<String>,
    to_status: Option<String>,
    payload: String,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<EventRow> for DocumentEvent {
    type Error = DbError;

    fn try_from(row: EventRow) -> DbResult<Self> {
        let payload =
            serde_json::from_str(&row.payload).map_err(|e| DbError::decode("payload", e))?;
        Ok(DocumentEvent {
            id: row.id,
            document_kind: row.document_kind,
            document_id: row.document_id,
            document_number: row.document_number,
            event_type: row.event_type,
            from_status: row.from_status,
            to_status: row.to_status,
            payload,
            created_at: row.created_at,
            dispatched_at: row.dispatched_at,
            attempts: row.attempts,
            last_error: row.last_error,
        })
    }
}

const SELECT_EVENT: &str = "SELECT id, document_kind, document_id, document_number, event_type, \
     from_status, to_status, payload, created_at, dispatched_at, attempts, last_error \
     FROM document_events";

// =============================================================================
// Writes (inside a document transaction)
// =============================================================================

/// Writes outbox rows on the connection of the change they describe.
pub struct EventRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> EventRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        EventRepository { conn }
    }

    pub async fn record(&mut self, event: NewEvent, now: DateTime<Utc>) -> DbResult<DocumentEvent> {
        let stored = DocumentEvent {
            id: Uuid::new_v4().to_string(),
            document_kind: event.document_kind,
            document_id: event.document_id,
            document_number: event.document_number,
            event_type: event.event_type,
            from_status: event.from_status,
            to_status: event.to_status,
            payload: event.payload,
            created_at: now,
            dispatched_at: None,
            attempts: 0,
            last_error: None,
        };

        debug!(
            topic = %stored.topic(),
            document = %stored.document_number,
            "Queuing document event"
        );

        let payload = serde_json::to_string(&stored.payload)
            .map_err(|e| DbError::decode("payload", e))?;

        sqlx::query(
            r#"
            INSERT INTO document_events (
                id, document_kind, document_id, document_number, event_type,
                from_status, to_status, payload, created_at, attempts
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&stored.id)
        .bind(stored.document_kind)
        .bind(&stored.document_id)
        .bind(&stored.document_number)
        .bind(stored.event_type)
        .bind(&stored.from_status)
        .bind(&stored.to_status)
        .bind(payload)
        .bind(stored.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(stored)
    }

    /// Every event recorded for a document, oldest first.
    pub async fn for_document(&mut self, document_id: &str) -> DbResult<Vec<DocumentEvent>> {
        let sql = format!("{SELECT_EVENT} WHERE document_id = ? ORDER BY created_at, rowid");
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(document_id)
            .fetch_all(&mut *self.conn)
            .await?;
        rows.into_iter().map(DocumentEvent::try_from).collect()
    }
}

// =============================================================================
// Dispatch (outside any document transaction)
// =============================================================================

/// Dispatcher-side access to the outbox.
#[derive(Clone)]
pub struct Outbox {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl Outbox {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Outbox { pool, clock }
    }

    /// Undispatched events, oldest first.
    pub async fn pending(&self, limit: u32) -> DbResult<Vec<DocumentEvent>> {
        let sql = format!(
            "{SELECT_EVENT} WHERE dispatched_at IS NULL ORDER BY created_at, rowid LIMIT ?"
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DocumentEvent::try_from).collect()
    }

    pub async fn mark_dispatched(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE document_events SET dispatched_at = ? WHERE id = ?")
            .bind(self.clock.now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("DocumentEvent", id));
        }
        Ok(())
    }

    /// Records a dispatch failure. The event stays pending.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        warn!(id = %id, error = %error, "Document event dispatch failed");

        let result = sqlx::query(
            r#"
            UPDATE document_events SET
                attempts = attempts + 1,
                last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("DocumentEvent", id));
        }
        Ok(())
    }

    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_events WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Deletes events dispatched more than `days_old` days ago.
    pub async fn cleanup_dispatched(&self, days_old: u32) -> DbResult<u64> {
        let cutoff = self.clock.now() - Duration::days(i64::from(days_old));
        let result = sqlx::query(
            "DELETE FROM document_events WHERE dispatched_at IS NOT NULL AND dispatched_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::TimeZone;
    use keystone_core::FixedClock;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    async fn record(db: &Database, number: &str) -> DocumentEvent {
        let mut conn = db.pool().acquire().await.unwrap();
        let event = NewEvent::new(
            DocumentKind::Order,
            "order-1",
            number,
            EventType::StatusChanged,
            &serde_json::json!({ "orderNumber": number }),
        )
        .unwrap()
        .status_change("PENDING", "PROCESSING");
        EventRepository::new(&mut conn).record(event, start()).await.unwrap()
    }

    #[test]
    fn test_topic() {
        let event = DocumentEvent {
            id: "e-1".to_string(),
            document_kind: DocumentKind::Invoice,
            document_id: "inv-1".to_string(),
            document_number: "INV-2026-00001".to_string(),
            event_type: EventType::PaymentApplied,
            from_status: None,
            to_status: None,
            payload: serde_json::Value::Null,
            created_at: start(),
            dispatched_at: None,
            attempts: 0,
            last_error: None,
        };
        assert_eq!(event.topic(), "INVOICE_PAYMENT_APPLIED");
    }

    #[tokio::test]
    async fn test_outbox_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = Arc::new(FixedClock::new(start()));
        let outbox = Outbox::new(db.pool().clone(), clock.clone());

        let first = record(&db, "ORD-2026-00001").await;
        let second = record(&db, "ORD-2026-00002").await;
        assert_eq!(outbox.count_pending().await.unwrap(), 2);

        let pending = outbox.pending(10).await.unwrap();
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[0].to_status.as_deref(), Some("PROCESSING"));
        assert_eq!(pending[0].payload["orderNumber"], "ORD-2026-00001");

        outbox.mark_failed(&second.id, "smtp timeout").await.unwrap();
        outbox.mark_dispatched(&first.id).await.unwrap();

        let pending = outbox.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("smtp timeout"));

        clock.advance(Duration::days(31));
        assert_eq!(outbox.cleanup_dispatched(30).await.unwrap(), 1);
        assert_eq!(outbox.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_unknown_event() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let outbox = Outbox::new(db.pool().clone(), Arc::new(FixedClock::new(start())));
        assert!(matches!(
            outbox.mark_dispatched("missing").await,
            Err(DbError::NotFound { .. })
        ));
    }
}
