use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::line_item::LineItem;
use crate::errors::DomainError;
use crate::totals::QuotationTotals;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationId(pub String);

impl QuotationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Lifecycle states. Internal review rejection is not terminal: it loops the
/// quotation back to `Draft` for correction. Only client approval, client
/// rejection and cancellation are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotationStatus {
    Draft,
    InReview,
    InternallyApproved,
    Sent,
    ApprovedByClient,
    Rejected,
    Cancelled,
}

impl QuotationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ApprovedByClient | Self::Rejected | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuotationId,
    /// Formatted document code, e.g. `COT-2025-0001`. Unique per year.
    pub code: String,
    pub client_id: String,
    pub status: QuotationStatus,
    pub issue_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub totals: QuotationTotals,
    pub items: Vec<LineItem>,
    pub notes: Option<String>,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quotation {
    pub fn can_transition_to(&self, next: QuotationStatus) -> bool {
        use QuotationStatus::{
            ApprovedByClient, Cancelled, Draft, InReview, InternallyApproved, Rejected, Sent,
        };

        if next == Cancelled {
            return !self.status.is_terminal();
        }

        matches!(
            (self.status, next),
            (Draft, InReview)
                | (Draft, InternallyApproved)
                | (InReview, InternallyApproved)
                | (InReview, Draft)
                | (InternallyApproved, Sent)
                | (Sent, ApprovedByClient)
                | (Sent, Rejected)
        )
    }

    /// Transitions mutate state and metadata only; total fields are never
    /// touched here.
    pub fn transition_to(&mut self, next: QuotationStatus) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Gate for operations that are only legal in one state, e.g. updates in
    /// `Draft` or client decisions in `Sent`.
    pub fn require_status(
        &self,
        operation: &'static str,
        required: QuotationStatus,
    ) -> Result<(), DomainError> {
        if self.status != required {
            return Err(DomainError::InvalidState {
                operation,
                current: self.status,
                required,
            });
        }
        Ok(())
    }
}

pub fn validate_validity_window(
    issue_date: NaiveDate,
    expiration_date: NaiveDate,
) -> Result<(), DomainError> {
    if expiration_date <= issue_date {
        return Err(DomainError::validation(
            "expiration_date",
            format!("must be after issue_date {issue_date}"),
        ));
    }
    Ok(())
}
