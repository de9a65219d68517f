use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use mekanos_core::domain::approval::{
    ApprovalLevel, ApprovalRequest, ApprovalRequestId, ApprovalStatus,
};
use mekanos_core::domain::quotation::QuotationId;

use super::{ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn level_as_str(level: &ApprovalLevel) -> &'static str {
    match level {
        ApprovalLevel::Supervisor => "supervisor",
        ApprovalLevel::Manager => "manager",
    }
}

fn parse_level(value: &str) -> Result<ApprovalLevel, RepositoryError> {
    match value {
        "supervisor" => Ok(ApprovalLevel::Supervisor),
        "manager" => Ok(ApprovalLevel::Manager),
        other => Err(RepositoryError::Decode(format!("unknown approval level `{other}`"))),
    }
}

fn status_as_str(status: &ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
    }
}

fn parse_status(value: &str) -> Result<ApprovalStatus, RepositoryError> {
    match value {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        other => Err(RepositoryError::Decode(format!("unknown approval status `{other}`"))),
    }
}

fn row_to_approval(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let text = |column: &str| -> Result<String, RepositoryError> {
        row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
    };
    let optional = |column: &str| -> Result<Option<String>, RepositoryError> {
        row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
    };
    let timestamp = |raw: &str, column: &str| -> Result<DateTime<Utc>, RepositoryError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
    };

    let resolved_at = match optional("resolved_at")? {
        Some(raw) => Some(timestamp(&raw, "resolved_at")?),
        None => None,
    };

    Ok(ApprovalRequest {
        id: ApprovalRequestId(text("id")?),
        quotation_id: QuotationId(text("quotation_id")?),
        level: parse_level(&text("level")?)?,
        status: parse_status(&text("status")?)?,
        justification: text("justification")?,
        requested_by: text("requested_by")?,
        requester_note: optional("requester_note")?,
        resolved_by: optional("resolved_by")?,
        approver_note: optional("approver_note")?,
        created_at: timestamp(&text("created_at")?, "created_at")?,
        resolved_at,
    })
}

const APPROVAL_COLUMNS: &str = "id, quotation_id, level, status, justification, requested_by,
    requester_note, resolved_by, approver_note, created_at, resolved_at";

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {APPROVAL_COLUMNS} FROM approval_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn find_open_for_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_request
             WHERE quotation_id = ? AND status = 'pending'
             ORDER BY created_at DESC
             LIMIT 1",
        ))
        .bind(&quotation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_request (id, quotation_id, level, status, justification,
                                           requested_by, requester_note, resolved_by,
                                           approver_note, created_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 resolved_by = excluded.resolved_by,
                 approver_note = excluded.approver_note,
                 resolved_at = excluded.resolved_at",
        )
        .bind(&approval.id.0)
        .bind(&approval.quotation_id.0)
        .bind(level_as_str(&approval.level))
        .bind(status_as_str(&approval.status))
        .bind(&approval.justification)
        .bind(&approval.requested_by)
        .bind(&approval.requester_note)
        .bind(&approval.resolved_by)
        .bind(&approval.approver_note)
        .bind(approval.created_at.to_rfc3339())
        .bind(approval.resolved_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
