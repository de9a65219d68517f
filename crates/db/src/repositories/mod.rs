use async_trait::async_trait;
use thiserror::Error;

use mekanos_core::domain::approval::{ApprovalRequest, ApprovalRequestId};
use mekanos_core::domain::delivery::DeliveryRecord;
use mekanos_core::domain::quotation::{Quotation, QuotationId, QuotationStatus};
use mekanos_core::domain::version::{VersionId, VersionSnapshot};
use mekanos_core::numbering::DocumentType;

pub mod approval;
pub mod memory;
pub mod quotation;
pub mod sequence;
pub mod version;

pub use approval::SqlApprovalRepository;
pub use memory::{
    InMemoryApprovalRepository, InMemoryQuotationRepository, InMemorySequenceCounter,
    InMemoryVersionRepository,
};
pub use quotation::SqlQuotationRepository;
pub use sequence::SqlSequenceCounter;
pub use version::SqlVersionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Default)]
pub struct QuotationFilter {
    pub status: Option<QuotationStatus>,
    pub client_id: Option<String>,
    pub limit: Option<u32>,
}

#[async_trait]
pub trait QuotationRepository: Send + Sync {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError>;
    async fn find_by_code(&self, code: &str) -> Result<Option<Quotation>, RepositoryError>;
    async fn list(&self, filter: QuotationFilter) -> Result<Vec<Quotation>, RepositoryError>;
    /// Upserts the aggregate: the quotation row and all of its line items.
    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError>;
    async fn record_delivery(&self, delivery: DeliveryRecord) -> Result<(), RepositoryError>;
    async fn list_deliveries(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<DeliveryRecord>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;
    /// At most one pending request per quotation is expected; returns the
    /// newest if the invariant was ever violated upstream.
    async fn find_open_for_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;
    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait VersionRepository: Send + Sync {
    /// Assigns the next sequential version number for the quotation and
    /// persists the snapshot. Returns the stored snapshot with its number.
    async fn append(&self, snapshot: VersionSnapshot) -> Result<VersionSnapshot, RepositoryError>;
    async fn find_by_id(&self, id: &VersionId) -> Result<Option<VersionSnapshot>, RepositoryError>;
    async fn list_for_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<VersionSnapshot>, RepositoryError>;
}

/// The one correctness-critical contract in this crate: `next` must never
/// hand the same value to two callers for the same `(document_type, year)`
/// key, no matter how many callers race.
#[async_trait]
pub trait SequenceCounter: Send + Sync {
    /// Consumes and returns the next sequence value.
    async fn next(&self, document_type: DocumentType, year: i32) -> Result<i64, RepositoryError>;
    /// Returns the value `next` would hand out right now, without consuming
    /// it. Preview only: a concurrent caller may take it first.
    async fn peek(&self, document_type: DocumentType, year: i32) -> Result<i64, RepositoryError>;
}
