//! In-memory repositories for tests and wiring experiments. Same contracts
//! as the SQL implementations, backed by maps behind async locks.

use std::collections::HashMap;

use tokio::sync::RwLock;

use mekanos_core::domain::approval::{ApprovalRequest, ApprovalRequestId, ApprovalStatus};
use mekanos_core::domain::delivery::DeliveryRecord;
use mekanos_core::domain::quotation::{Quotation, QuotationId};
use mekanos_core::domain::version::{VersionId, VersionSnapshot};
use mekanos_core::numbering::DocumentType;

use super::{
    ApprovalRepository, QuotationFilter, QuotationRepository, RepositoryError, SequenceCounter,
    VersionRepository,
};

#[derive(Default)]
pub struct InMemoryQuotationRepository {
    quotations: RwLock<HashMap<String, Quotation>>,
    deliveries: RwLock<Vec<DeliveryRecord>>,
}

impl InMemoryQuotationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl QuotationRepository for InMemoryQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        Ok(self.quotations.read().await.get(&id.0).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Quotation>, RepositoryError> {
        Ok(self
            .quotations
            .read()
            .await
            .values()
            .find(|quotation| quotation.code == code)
            .cloned())
    }

    async fn list(&self, filter: QuotationFilter) -> Result<Vec<Quotation>, RepositoryError> {
        let guard = self.quotations.read().await;
        let mut quotations: Vec<Quotation> = guard
            .values()
            .filter(|quotation| {
                filter.status.map_or(true, |status| quotation.status == status)
                    && filter
                        .client_id
                        .as_deref()
                        .map_or(true, |client| quotation.client_id == client)
            })
            .cloned()
            .collect();
        quotations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            quotations.truncate(limit as usize);
        }
        Ok(quotations)
    }

    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError> {
        self.quotations.write().await.insert(quotation.id.0.clone(), quotation);
        Ok(())
    }

    async fn record_delivery(&self, delivery: DeliveryRecord) -> Result<(), RepositoryError> {
        self.deliveries.write().await.push(delivery);
        Ok(())
    }

    async fn list_deliveries(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<DeliveryRecord>, RepositoryError> {
        let mut deliveries: Vec<DeliveryRecord> = self
            .deliveries
            .read()
            .await
            .iter()
            .filter(|delivery| &delivery.quotation_id == quotation_id)
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(deliveries)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<String, ApprovalRequest>>,
}

impl InMemoryApprovalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self.approvals.read().await.get(&id.0).cloned())
    }

    async fn find_open_for_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self
            .approvals
            .read()
            .await
            .values()
            .filter(|approval| {
                &approval.quotation_id == quotation_id
                    && approval.status == ApprovalStatus::Pending
            })
            .max_by_key(|approval| approval.created_at)
            .cloned())
    }

    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError> {
        self.approvals.write().await.insert(approval.id.0.clone(), approval);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryVersionRepository {
    versions: RwLock<Vec<VersionSnapshot>>,
}

impl InMemoryVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl VersionRepository for InMemoryVersionRepository {
    async fn append(
        &self,
        mut snapshot: VersionSnapshot,
    ) -> Result<VersionSnapshot, RepositoryError> {
        let mut guard = self.versions.write().await;
        let next_number = guard
            .iter()
            .filter(|existing| existing.quotation_id == snapshot.quotation_id)
            .map(|existing| existing.version_number)
            .max()
            .unwrap_or(0)
            + 1;
        snapshot.version_number = next_number;
        guard.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn find_by_id(&self, id: &VersionId) -> Result<Option<VersionSnapshot>, RepositoryError> {
        Ok(self
            .versions
            .read()
            .await
            .iter()
            .find(|snapshot| &snapshot.id == id)
            .cloned())
    }

    async fn list_for_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<VersionSnapshot>, RepositoryError> {
        let mut snapshots: Vec<VersionSnapshot> = self
            .versions
            .read()
            .await
            .iter()
            .filter(|snapshot| &snapshot.quotation_id == quotation_id)
            .cloned()
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.version_number);
        Ok(snapshots)
    }
}

#[derive(Default)]
pub struct InMemorySequenceCounter {
    counters: RwLock<HashMap<(String, i32), i64>>,
}

impl InMemorySequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SequenceCounter for InMemorySequenceCounter {
    async fn next(&self, document_type: DocumentType, year: i32) -> Result<i64, RepositoryError> {
        let mut guard = self.counters.write().await;
        let value = guard.entry((document_type.as_str().to_string(), year)).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn peek(&self, document_type: DocumentType, year: i32) -> Result<i64, RepositoryError> {
        let guard = self.counters.read().await;
        Ok(guard
            .get(&(document_type.as_str().to_string(), year))
            .copied()
            .unwrap_or(0)
            + 1)
    }
}
