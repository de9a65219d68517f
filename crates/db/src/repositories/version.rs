use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use mekanos_core::domain::quotation::QuotationId;
use mekanos_core::domain::version::{VersionId, VersionSnapshot};

use super::{RepositoryError, VersionRepository};
use crate::DbPool;

pub struct SqlVersionRepository {
    pool: DbPool,
}

impl SqlVersionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_snapshot(row: &SqliteRow) -> Result<VersionSnapshot, RepositoryError> {
    let text = |column: &str| -> Result<String, RepositoryError> {
        row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
    };

    let payload_raw = text("payload")?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|e| RepositoryError::Decode(format!("payload: {e}")))?;
    let created_at = DateTime::parse_from_rfc3339(&text("created_at")?)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("created_at: {e}")))?;

    Ok(VersionSnapshot {
        id: VersionId(text("id")?),
        quotation_id: QuotationId(text("quotation_id")?),
        version_number: row
            .try_get("version_number")
            .map_err(|e| RepositoryError::Decode(format!("version_number: {e}")))?,
        payload,
        reason: text("reason")?,
        created_by: text("created_by")?,
        created_at,
    })
}

#[async_trait::async_trait]
impl VersionRepository for SqlVersionRepository {
    async fn append(
        &self,
        mut snapshot: VersionSnapshot,
    ) -> Result<VersionSnapshot, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let next_number: i64 = sqlx::query(
            "SELECT COALESCE(MAX(version_number), 0) + 1 AS next_number
             FROM quotation_version WHERE quotation_id = ?",
        )
        .bind(&snapshot.quotation_id.0)
        .fetch_one(&mut *tx)
        .await?
        .try_get("next_number")
        .map_err(|e| RepositoryError::Decode(format!("next_number: {e}")))?;
        snapshot.version_number = next_number;

        sqlx::query(
            "INSERT INTO quotation_version (id, quotation_id, version_number, payload,
                                            reason, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id.0)
        .bind(&snapshot.quotation_id.0)
        .bind(snapshot.version_number)
        .bind(snapshot.payload.to_string())
        .bind(&snapshot.reason)
        .bind(&snapshot.created_by)
        .bind(snapshot.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(snapshot)
    }

    async fn find_by_id(&self, id: &VersionId) -> Result<Option<VersionSnapshot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, quotation_id, version_number, payload, reason, created_by, created_at
             FROM quotation_version WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_snapshot).transpose()
    }

    async fn list_for_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<VersionSnapshot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, quotation_id, version_number, payload, reason, created_by, created_at
             FROM quotation_version WHERE quotation_id = ?
             ORDER BY version_number",
        )
        .bind(&quotation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use mekanos_core::domain::quotation::{Quotation, QuotationId, QuotationStatus};
    use mekanos_core::domain::version::{VersionId, VersionSnapshot};
    use mekanos_core::totals::QuotationTotals;

    use super::SqlVersionRepository;
    use crate::repositories::{QuotationRepository, SqlQuotationRepository, VersionRepository};
    use crate::{connect_with_settings, migrations};

    // Snapshot rows reference quotation(id), so each fixture seeds its parent
    // quotations first.
    async fn setup(quotations: &[(&str, &str)]) -> SqlVersionRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let parents = SqlQuotationRepository::new(pool.clone());
        for (id, code) in quotations {
            let now = Utc::now();
            parents
                .save(Quotation {
                    id: QuotationId(id.to_string()),
                    code: code.to_string(),
                    client_id: "client-77".to_string(),
                    status: QuotationStatus::Draft,
                    issue_date: NaiveDate::from_ymd_opt(2025, 2, 10).expect("date"),
                    expiration_date: NaiveDate::from_ymd_opt(2025, 3, 10).expect("date"),
                    totals: QuotationTotals::zero(Decimal::ZERO, Decimal::from(19)),
                    items: Vec::new(),
                    notes: None,
                    created_by: "emp-4".to_string(),
                    updated_by: None,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .expect("seed parent quotation");
        }

        SqlVersionRepository::new(pool)
    }

    fn snapshot(quotation: &str, reason: &str) -> VersionSnapshot {
        VersionSnapshot {
            id: VersionId::generate(),
            quotation_id: QuotationId(quotation.to_string()),
            version_number: 0,
            payload: serde_json::json!({"code": "COT-2025-0001", "items": []}),
            reason: reason.to_string(),
            created_by: "emp-4".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_assigns_sequential_numbers_per_quotation() {
        let repo = setup(&[("q-1", "COT-2025-0001"), ("q-2", "COT-2025-0002")]).await;

        let first = repo.append(snapshot("q-1", "before discount change")).await.expect("first");
        let second = repo.append(snapshot("q-1", "sent to client")).await.expect("second");
        let other = repo.append(snapshot("q-2", "sent to client")).await.expect("other");

        assert_eq!(first.version_number, 1);
        assert_eq!(second.version_number, 2);
        assert_eq!(other.version_number, 1);
    }

    #[tokio::test]
    async fn snapshots_list_in_version_order_with_payload_intact() {
        let repo = setup(&[("q-1", "COT-2025-0001")]).await;
        repo.append(snapshot("q-1", "first")).await.expect("first");
        repo.append(snapshot("q-1", "second")).await.expect("second");

        let versions = repo
            .list_for_quotation(&QuotationId("q-1".to_string()))
            .await
            .expect("list");

        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_number, 1);
        assert_eq!(versions[0].reason, "first");
        assert_eq!(versions[1].payload["code"], "COT-2025-0001");
    }

    #[tokio::test]
    async fn find_by_id_returns_stored_snapshot() {
        let repo = setup(&[("q-1", "COT-2025-0001")]).await;
        let stored = repo.append(snapshot("q-1", "before sending")).await.expect("append");

        let found = repo.find_by_id(&stored.id).await.expect("find").expect("exists");
        assert_eq!(found, stored);

        let missing = repo
            .find_by_id(&VersionId("nope".to_string()))
            .await
            .expect("find missing");
        assert!(missing.is_none());
    }
}
