use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quotation::QuotationId;

/// One attempt to deliver a quotation to a client. Recorded whether or not
/// the mail dispatch succeeded, so the history shows failed attempts too.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub quotation_id: QuotationId,
    pub recipient: String,
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn new(
        quotation_id: QuotationId,
        recipient: impl Into<String>,
        success: bool,
        provider_message_id: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            quotation_id,
            recipient: recipient.into(),
            success,
            provider_message_id,
            error,
            sent_at: Utc::now(),
        }
    }
}
