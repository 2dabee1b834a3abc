//! # Document Numbering
//!
//! Gap-free yearly sequences per document kind: `ORD-2026-00001`,
//! `ORD-2026-00002`, ... and back to `00001` in January.

use sqlx::SqliteConnection;
use tracing::debug;

use keystone_core::DocumentKind;

use crate::error::DbResult;

pub struct SequenceRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SequenceRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SequenceRepository { conn }
    }

    /// Claims the next number. Rolled back with the surrounding transaction.
    pub async fn next_number(
        &mut self,
        kind: DocumentKind,
        prefix: &str,
        year: i32,
    ) -> DbResult<String> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO document_sequences (kind, year, last_value) VALUES (?, ?, 1)
            ON CONFLICT (kind, year) DO UPDATE SET last_value = last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(kind)
        .bind(year)
        .fetch_one(&mut *self.conn)
        .await?;

        let number = format_number(prefix, year, value);
        debug!(%kind, number = %number, "Allocated document number");
        Ok(number)
    }
}

fn format_number(prefix: &str, year: i32, value: i64) -> String {
    format!("{}-{}-{:05}", prefix, year, value)
}
