use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quotation::QuotationId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRequestId(pub String);

impl ApprovalRequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Sign-off tier required for a quotation. `NONE` is not persisted; a
/// quotation that needs no sign-off never gets an approval request row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalLevel {
    Supervisor,
    Manager,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub quotation_id: QuotationId,
    pub level: ApprovalLevel,
    pub status: ApprovalStatus,
    /// Routing explanation recorded when the request was opened.
    pub justification: String,
    pub requested_by: String,
    pub requester_note: Option<String>,
    pub resolved_by: Option<String>,
    pub approver_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn open(
        quotation_id: QuotationId,
        level: ApprovalLevel,
        justification: impl Into<String>,
        requested_by: impl Into<String>,
        requester_note: Option<String>,
    ) -> Self {
        Self {
            id: ApprovalRequestId::generate(),
            quotation_id,
            level,
            status: ApprovalStatus::Pending,
            justification: justification.into(),
            requested_by: requested_by.into(),
            requester_note,
            resolved_by: None,
            approver_note: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// An approval request is resolved exactly once.
    pub fn resolve(
        &mut self,
        decision: ApprovalDecision,
        resolved_by: impl Into<String>,
        approver_note: Option<String>,
    ) -> Result<(), DomainError> {
        if self.status != ApprovalStatus::Pending {
            return Err(DomainError::AlreadyProcessed {
                id: self.id.0.clone(),
                resolution: format!("{:?}", self.status),
            });
        }

        self.status = match decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Rejected,
        };
        self.resolved_by = Some(resolved_by.into());
        self.approver_note = approver_note;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}
