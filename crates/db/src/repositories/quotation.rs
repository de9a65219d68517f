use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use mekanos_core::domain::delivery::DeliveryRecord;
use mekanos_core::domain::line_item::{LineItem, LineItemId, LineItemKind};
use mekanos_core::domain::quotation::{Quotation, QuotationId, QuotationStatus};
use mekanos_core::totals::QuotationTotals;

use super::{QuotationFilter, QuotationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlQuotationRepository {
    pool: DbPool,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, quotation_id: &str) -> Result<Vec<LineItem>, RepositoryError> {
        let mut items = Vec::new();
        for (table, kind) in
            [("quotation_service", LineItemKind::Service), ("quotation_component", LineItemKind::Component)]
        {
            let rows: Vec<SqliteRow> = sqlx::query(&format!(
                "SELECT id, description, quantity, unit_price, discount_pct, subtotal,
                        warranty_months
                 FROM {table} WHERE quotation_id = ? ORDER BY id",
            ))
            .bind(quotation_id)
            .fetch_all(&self.pool)
            .await?;

            for row in &rows {
                items.push(row_to_item(row, kind)?);
            }
        }
        Ok(items)
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<Quotation, RepositoryError> {
        let mut quotation = row_to_quotation(row)?;
        quotation.items = self.load_items(&quotation.id.0).await?;
        Ok(quotation)
    }
}

pub fn quotation_status_as_str(status: &QuotationStatus) -> &'static str {
    match status {
        QuotationStatus::Draft => "draft",
        QuotationStatus::InReview => "in_review",
        QuotationStatus::InternallyApproved => "internally_approved",
        QuotationStatus::Sent => "sent",
        QuotationStatus::ApprovedByClient => "approved_by_client",
        QuotationStatus::Rejected => "rejected",
        QuotationStatus::Cancelled => "cancelled",
    }
}

pub fn parse_quotation_status(value: &str) -> Result<QuotationStatus, RepositoryError> {
    match value {
        "draft" => Ok(QuotationStatus::Draft),
        "in_review" => Ok(QuotationStatus::InReview),
        "internally_approved" => Ok(QuotationStatus::InternallyApproved),
        "sent" => Ok(QuotationStatus::Sent),
        "approved_by_client" => Ok(QuotationStatus::ApprovedByClient),
        "rejected" => Ok(QuotationStatus::Rejected),
        "cancelled" => Ok(QuotationStatus::Cancelled),
        other => Err(RepositoryError::Decode(format!("unknown quotation status `{other}`"))),
    }
}

fn text_column(row: &SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn optional_text_column(row: &SqliteRow, column: &str) -> Result<Option<String>, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, RepositoryError> {
    let raw = text_column(row, column)?;
    Decimal::from_str(&raw).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn date_column(row: &SqliteRow, column: &str) -> Result<NaiveDate, RepositoryError> {
    let raw = text_column(row, column)?;
    raw.parse().map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn timestamp_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw = text_column(row, column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn row_to_quotation(row: &SqliteRow) -> Result<Quotation, RepositoryError> {
    let status = parse_quotation_status(&text_column(row, "status")?)?;

    Ok(Quotation {
        id: QuotationId(text_column(row, "id")?),
        code: text_column(row, "code")?,
        client_id: text_column(row, "client_id")?,
        status,
        issue_date: date_column(row, "issue_date")?,
        expiration_date: date_column(row, "expiration_date")?,
        totals: QuotationTotals {
            services_subtotal: decimal_column(row, "services_subtotal")?,
            components_subtotal: decimal_column(row, "components_subtotal")?,
            combined_subtotal: decimal_column(row, "combined_subtotal")?,
            discount_pct: decimal_column(row, "discount_pct")?,
            discount_amount: decimal_column(row, "discount_amount")?,
            subtotal_after_discount: decimal_column(row, "subtotal_after_discount")?,
            tax_pct: decimal_column(row, "tax_pct")?,
            tax_amount: decimal_column(row, "tax_amount")?,
            grand_total: decimal_column(row, "grand_total")?,
        },
        items: Vec::new(),
        notes: optional_text_column(row, "notes")?,
        created_by: text_column(row, "created_by")?,
        updated_by: optional_text_column(row, "updated_by")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

fn row_to_item(row: &SqliteRow, kind: LineItemKind) -> Result<LineItem, RepositoryError> {
    let warranty_raw: Option<i64> = row
        .try_get("warranty_months")
        .map_err(|e| RepositoryError::Decode(format!("warranty_months: {e}")))?;
    let warranty_months = warranty_raw
        .map(|months| {
            u32::try_from(months).map_err(|_| {
                RepositoryError::Decode(format!("warranty_months: {months} is out of range"))
            })
        })
        .transpose()?;

    Ok(LineItem {
        id: LineItemId(text_column(row, "id")?),
        kind,
        description: text_column(row, "description")?,
        quantity: decimal_column(row, "quantity")?,
        unit_price: decimal_column(row, "unit_price")?,
        discount_pct: decimal_column(row, "discount_pct")?,
        subtotal: decimal_column(row, "subtotal")?,
        warranty_months,
    })
}

const QUOTATION_COLUMNS: &str = "id, code, client_id, status, issue_date, expiration_date,
    services_subtotal, components_subtotal, combined_subtotal, discount_pct, discount_amount,
    subtotal_after_discount, tax_pct, tax_amount, grand_total, notes, created_by, updated_by,
    created_at, updated_at";

#[async_trait::async_trait]
impl QuotationRepository for SqlQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTATION_COLUMNS} FROM quotation WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Quotation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTATION_COLUMNS} FROM quotation WHERE code = ?"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: QuotationFilter) -> Result<Vec<Quotation>, RepositoryError> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {QUOTATION_COLUMNS} FROM quotation WHERE 1 = 1"
        ));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(quotation_status_as_str(&status));
        }
        if let Some(client_id) = filter.client_id {
            builder.push(" AND client_id = ").push_bind(client_id);
        }
        builder.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows: Vec<SqliteRow> = builder.build().fetch_all(&self.pool).await?;

        let mut quotations = Vec::with_capacity(rows.len());
        for row in &rows {
            quotations.push(self.hydrate(row).await?);
        }
        Ok(quotations)
    }

    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quotation (id, code, client_id, status, issue_date, expiration_date,
                                    services_subtotal, components_subtotal, combined_subtotal,
                                    discount_pct, discount_amount, subtotal_after_discount,
                                    tax_pct, tax_amount, grand_total, notes, created_by,
                                    updated_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 issue_date = excluded.issue_date,
                 expiration_date = excluded.expiration_date,
                 services_subtotal = excluded.services_subtotal,
                 components_subtotal = excluded.components_subtotal,
                 combined_subtotal = excluded.combined_subtotal,
                 discount_pct = excluded.discount_pct,
                 discount_amount = excluded.discount_amount,
                 subtotal_after_discount = excluded.subtotal_after_discount,
                 tax_pct = excluded.tax_pct,
                 tax_amount = excluded.tax_amount,
                 grand_total = excluded.grand_total,
                 notes = excluded.notes,
                 updated_by = excluded.updated_by,
                 updated_at = excluded.updated_at",
        )
        .bind(&quotation.id.0)
        .bind(&quotation.code)
        .bind(&quotation.client_id)
        .bind(quotation_status_as_str(&quotation.status))
        .bind(quotation.issue_date.to_string())
        .bind(quotation.expiration_date.to_string())
        .bind(quotation.totals.services_subtotal.to_string())
        .bind(quotation.totals.components_subtotal.to_string())
        .bind(quotation.totals.combined_subtotal.to_string())
        .bind(quotation.totals.discount_pct.to_string())
        .bind(quotation.totals.discount_amount.to_string())
        .bind(quotation.totals.subtotal_after_discount.to_string())
        .bind(quotation.totals.tax_pct.to_string())
        .bind(quotation.totals.tax_amount.to_string())
        .bind(quotation.totals.grand_total.to_string())
        .bind(&quotation.notes)
        .bind(&quotation.created_by)
        .bind(&quotation.updated_by)
        .bind(quotation.created_at.to_rfc3339())
        .bind(quotation.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM quotation_service WHERE quotation_id = ?")
            .bind(&quotation.id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM quotation_component WHERE quotation_id = ?")
            .bind(&quotation.id.0)
            .execute(&mut *tx)
            .await?;

        for item in &quotation.items {
            let table = match item.kind {
                LineItemKind::Service => "quotation_service",
                LineItemKind::Component => "quotation_component",
            };
            sqlx::query(&format!(
                "INSERT INTO {table} (id, quotation_id, description, quantity, unit_price,
                                      discount_pct, subtotal, warranty_months)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            ))
            .bind(&item.id.0)
            .bind(&quotation.id.0)
            .bind(&item.description)
            .bind(item.quantity.to_string())
            .bind(item.unit_price.to_string())
            .bind(item.discount_pct.to_string())
            .bind(item.subtotal.to_string())
            .bind(item.warranty_months.map(i64::from))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_delivery(&self, delivery: DeliveryRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO quotation_delivery (id, quotation_id, recipient, success,
                                             provider_message_id, error, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&delivery.id)
        .bind(&delivery.quotation_id.0)
        .bind(&delivery.recipient)
        .bind(delivery.success)
        .bind(&delivery.provider_message_id)
        .bind(&delivery.error)
        .bind(delivery.sent_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_deliveries(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<DeliveryRecord>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT id, quotation_id, recipient, success, provider_message_id, error, sent_at
             FROM quotation_delivery WHERE quotation_id = ? ORDER BY sent_at DESC",
        )
        .bind(&quotation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let success: bool = row
                    .try_get("success")
                    .map_err(|e| RepositoryError::Decode(format!("success: {e}")))?;
                Ok(DeliveryRecord {
                    id: text_column(row, "id")?,
                    quotation_id: QuotationId(text_column(row, "quotation_id")?),
                    recipient: text_column(row, "recipient")?,
                    success,
                    provider_message_id: optional_text_column(row, "provider_message_id")?,
                    error: optional_text_column(row, "error")?,
                    sent_at: timestamp_column(row, "sent_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use mekanos_core::domain::delivery::DeliveryRecord;
    use mekanos_core::domain::line_item::{LineItem, LineItemKind, NewLineItem};
    use mekanos_core::domain::quotation::{Quotation, QuotationId, QuotationStatus};
    use mekanos_core::totals::{compute_totals, QuotationTotals};

    use super::SqlQuotationRepository;
    use crate::repositories::{QuotationFilter, QuotationRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn items() -> Vec<LineItem> {
        vec![
            LineItem::new(NewLineItem {
                kind: LineItemKind::Service,
                description: "pump overhaul".to_string(),
                quantity: Decimal::from(1),
                unit_price: Decimal::from(1_500_000),
                discount_pct: Decimal::ZERO,
                warranty_months: Some(3),
            })
            .expect("service item"),
            LineItem::new(NewLineItem {
                kind: LineItemKind::Component,
                description: "mechanical seal".to_string(),
                quantity: Decimal::from(2),
                unit_price: Decimal::from(250_000),
                discount_pct: Decimal::from(10),
                warranty_months: None,
            })
            .expect("component item"),
        ]
    }

    fn sample_quotation(id: &str, code: &str) -> Quotation {
        let now = Utc::now();
        let items = items();
        let totals = compute_totals(&items, Decimal::from(10), Decimal::from(19));
        Quotation {
            id: QuotationId(id.to_string()),
            code: code.to_string(),
            client_id: "client-77".to_string(),
            status: QuotationStatus::Draft,
            issue_date: NaiveDate::from_ymd_opt(2025, 2, 10).expect("date"),
            expiration_date: NaiveDate::from_ymd_opt(2025, 3, 10).expect("date"),
            totals,
            items,
            notes: Some("includes on-site labor".to_string()),
            created_by: "emp-4".to_string(),
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_aggregate_with_items() {
        let pool = setup().await;
        let repo = SqlQuotationRepository::new(pool);
        let quotation = sample_quotation("q-1", "COT-2025-0001");

        repo.save(quotation.clone()).await.expect("save");
        let found = repo
            .find_by_id(&QuotationId("q-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");

        assert_eq!(found.code, "COT-2025-0001");
        assert_eq!(found.items.len(), 2);
        assert_eq!(found.totals.grand_total, quotation.totals.grand_total);
        assert_eq!(found.totals.grand_total.to_string(), "2088450.00");
    }

    #[tokio::test]
    async fn find_by_code_matches_unique_document_code() {
        let pool = setup().await;
        let repo = SqlQuotationRepository::new(pool);
        repo.save(sample_quotation("q-1", "COT-2025-0001")).await.expect("save");

        let found = repo.find_by_code("COT-2025-0001").await.expect("find");
        assert_eq!(found.map(|quotation| quotation.id.0), Some("q-1".to_string()));

        let missing = repo.find_by_code("COT-2025-9999").await.expect("find missing");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn save_upserts_and_replaces_line_items() {
        let pool = setup().await;
        let repo = SqlQuotationRepository::new(pool);
        let mut quotation = sample_quotation("q-1", "COT-2025-0001");
        repo.save(quotation.clone()).await.expect("first save");

        quotation.items.pop();
        quotation.totals =
            compute_totals(&quotation.items, Decimal::from(10), Decimal::from(19));
        quotation.status = QuotationStatus::InReview;
        repo.save(quotation).await.expect("second save");

        let found = repo
            .find_by_id(&QuotationId("q-1".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.status, QuotationStatus::InReview);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_client() {
        let pool = setup().await;
        let repo = SqlQuotationRepository::new(pool);

        repo.save(sample_quotation("q-1", "COT-2025-0001")).await.expect("save 1");
        let mut sent = sample_quotation("q-2", "COT-2025-0002");
        sent.status = QuotationStatus::Sent;
        repo.save(sent).await.expect("save 2");
        let mut other_client = sample_quotation("q-3", "COT-2025-0003");
        other_client.client_id = "client-99".to_string();
        repo.save(other_client).await.expect("save 3");

        let drafts = repo
            .list(QuotationFilter { status: Some(QuotationStatus::Draft), ..Default::default() })
            .await
            .expect("list drafts");
        assert_eq!(drafts.len(), 2);

        let for_client = repo
            .list(QuotationFilter {
                client_id: Some("client-99".to_string()),
                ..Default::default()
            })
            .await
            .expect("list by client");
        assert_eq!(for_client.len(), 1);
        assert_eq!(for_client[0].id.0, "q-3");

        let limited = repo
            .list(QuotationFilter { limit: Some(1), ..Default::default() })
            .await
            .expect("list limited");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn delivery_history_round_trips() {
        let pool = setup().await;
        let repo = SqlQuotationRepository::new(pool);
        repo.save(sample_quotation("q-1", "COT-2025-0001")).await.expect("save");

        repo.record_delivery(DeliveryRecord::new(
            QuotationId("q-1".to_string()),
            "compras@client77.example",
            true,
            Some("msg-123".to_string()),
            None,
        ))
        .await
        .expect("record success");
        repo.record_delivery(DeliveryRecord::new(
            QuotationId("q-1".to_string()),
            "compras@client77.example",
            false,
            None,
            Some("gateway timeout".to_string()),
        ))
        .await
        .expect("record failure");

        let deliveries =
            repo.list_deliveries(&QuotationId("q-1".to_string())).await.expect("list");
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().any(|delivery| !delivery.success));
    }

    #[tokio::test]
    async fn negative_stored_warranty_fails_decode_instead_of_wrapping() {
        let pool = setup().await;
        let repo = SqlQuotationRepository::new(pool.clone());
        repo.save(sample_quotation("q-1", "COT-2025-0001")).await.expect("save");

        sqlx::query("UPDATE quotation_service SET warranty_months = -3 WHERE quotation_id = 'q-1'")
            .execute(&pool)
            .await
            .expect("corrupt row");

        let error = repo
            .find_by_id(&QuotationId("q-1".to_string()))
            .await
            .expect_err("out-of-range warranty must not decode");
        assert!(error.to_string().contains("warranty_months"), "unexpected error: {error}");
    }

    #[test]
    fn status_codec_is_exhaustive() {
        use super::{parse_quotation_status, quotation_status_as_str};

        for status in [
            QuotationStatus::Draft,
            QuotationStatus::InReview,
            QuotationStatus::InternallyApproved,
            QuotationStatus::Sent,
            QuotationStatus::ApprovedByClient,
            QuotationStatus::Rejected,
            QuotationStatus::Cancelled,
        ] {
            let encoded = quotation_status_as_str(&status);
            assert_eq!(parse_quotation_status(encoded).expect("parse"), status);
        }
        assert!(parse_quotation_status("3").is_err(), "numeric state codes are not accepted");
    }

    #[test]
    fn totals_type_serializes_for_snapshots() {
        let totals = QuotationTotals::zero(Decimal::ZERO, Decimal::from(19));
        let value = serde_json::to_value(&totals).expect("serialize");
        assert_eq!(value["grand_total"], serde_json::json!("0.00"));
    }
}
