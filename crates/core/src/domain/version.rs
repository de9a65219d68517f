use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quotation::{Quotation, QuotationId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(pub String);

impl VersionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Immutable point-in-time copy of a quotation and its line items. Version
/// numbers are sequential per quotation, starting at 1; the repository assigns
/// them at append time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub id: VersionId,
    pub quotation_id: QuotationId,
    pub version_number: i64,
    pub payload: serde_json::Value,
    pub reason: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl VersionSnapshot {
    /// Serializes the full aggregate into a self-contained record. The
    /// version number is a placeholder until the repository assigns the next
    /// sequential value.
    pub fn capture(
        quotation: &Quotation,
        reason: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: VersionId::generate(),
            quotation_id: quotation.id.clone(),
            version_number: 0,
            payload: serde_json::to_value(quotation)?,
            reason: reason.into(),
            created_by: created_by.into(),
            created_at: Utc::now(),
        })
    }
}
