use std::time::Duration;

use sqlx::Row;

use mekanos_core::numbering::DocumentType;

use super::{RepositoryError, SequenceCounter};
use crate::DbPool;

/// Allocates document numbers from the `sequence_counter` table. The whole
/// increment is a single upsert statement, so two racing callers can never
/// observe the same `last_value`.
pub struct SqlSequenceCounter {
    pool: DbPool,
}

impl SqlSequenceCounter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const MAX_ATTEMPTS: u32 = 3;

fn is_busy(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    }
}

#[async_trait::async_trait]
impl SequenceCounter for SqlSequenceCounter {
    async fn next(&self, document_type: DocumentType, year: i32) -> Result<i64, RepositoryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = sqlx::query(
                "INSERT INTO sequence_counter (document_type, year, last_value)
                 VALUES (?, ?, 1)
                 ON CONFLICT(document_type, year)
                 DO UPDATE SET last_value = last_value + 1
                 RETURNING last_value",
            )
            .bind(document_type.as_str())
            .bind(year)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => {
                    return row
                        .try_get::<i64, _>("last_value")
                        .map_err(|e| RepositoryError::Decode(format!("last_value: {e}")));
                }
                Err(error) if is_busy(&error) && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        document_type = %document_type,
                        year,
                        attempt,
                        "sequence counter busy, retrying",
                    );
                    tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn peek(&self, document_type: DocumentType, year: i32) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT last_value FROM sequence_counter WHERE document_type = ? AND year = ?",
        )
        .bind(document_type.as_str())
        .bind(year)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let last: i64 = row
                    .try_get("last_value")
                    .map_err(|e| RepositoryError::Decode(format!("last_value: {e}")))?;
                Ok(last + 1)
            }
            None => Ok(1),
        }
    }
}
