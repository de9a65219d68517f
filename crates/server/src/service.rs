//! Quotation lifecycle orchestration. Repositories handle persistence, the
//! core crate holds the pure rules; this service wires them together and
//! emits audit events for every state change.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use mekanos_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use mekanos_core::domain::approval::{ApprovalDecision, ApprovalRequest, ApprovalRequestId};
use mekanos_core::domain::delivery::DeliveryRecord;
use mekanos_core::domain::line_item::{
    validate_percentage, LineItem, LineItemId, LineItemPatch, NewLineItem,
};
use mekanos_core::domain::quotation::{
    validate_validity_window, Quotation, QuotationId, QuotationStatus,
};
use mekanos_core::domain::rejection::find_rejection_reason;
use mekanos_core::domain::version::{VersionId, VersionSnapshot};
use mekanos_core::errors::DomainError;
use mekanos_core::numbering::{format_code, DocumentType};
use mekanos_core::routing::{route, ApprovalThresholds};
use mekanos_core::totals::compute_totals;
use mekanos_db::repositories::{
    ApprovalRepository, QuotationFilter, QuotationRepository, RepositoryError, SequenceCounter,
    VersionRepository,
};

use crate::mail::{MailDispatcher, OutboundQuotationMail};
use crate::pdf::DocumentRenderer;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Clone, Debug)]
pub struct NewQuotation {
    pub client_id: String,
    pub issue_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub discount_pct: Decimal,
    pub tax_pct: Decimal,
    pub notes: Option<String>,
    pub items: Vec<NewLineItem>,
    pub created_by: String,
}

#[derive(Clone, Debug, Default)]
pub struct QuotationUpdate {
    pub issue_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub discount_pct: Option<Decimal>,
    pub tax_pct: Option<Decimal>,
    pub notes: Option<String>,
}

/// Result of submitting a quotation for internal review. `request` is `None`
/// when the routing rules let the quotation pass without sign-off.
#[derive(Clone, Debug)]
pub struct ApprovalOutcome {
    pub quotation: Quotation,
    pub request: Option<ApprovalRequest>,
}

#[derive(Clone, Debug)]
pub enum NotificationStatus {
    Delivered { provider_message_id: Option<String> },
    Failed { error: String },
    Disabled,
}

#[derive(Clone, Debug)]
pub struct SendOutcome {
    pub quotation: Quotation,
    pub snapshot: VersionSnapshot,
    pub notification: NotificationStatus,
}

pub struct ServiceDeps {
    pub quotations: Arc<dyn QuotationRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub versions: Arc<dyn VersionRepository>,
    pub sequences: Arc<dyn SequenceCounter>,
    pub mail: Arc<dyn MailDispatcher>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone, Debug)]
pub struct ServicePolicy {
    pub thresholds: ApprovalThresholds,
    pub quotation_pad_width: usize,
    pub service_order_pad_width: usize,
    pub mail_enabled: bool,
    pub company_name: String,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            thresholds: ApprovalThresholds::default(),
            quotation_pad_width: 4,
            service_order_pad_width: 4,
            mail_enabled: false,
            company_name: "MEKANOS S.A.S".to_string(),
        }
    }
}

pub struct QuotationService {
    quotations: Arc<dyn QuotationRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    versions: Arc<dyn VersionRepository>,
    sequences: Arc<dyn SequenceCounter>,
    mail: Arc<dyn MailDispatcher>,
    renderer: Arc<dyn DocumentRenderer>,
    audit: Arc<dyn AuditSink>,
    policy: ServicePolicy,
}

impl QuotationService {
    pub fn new(deps: ServiceDeps, policy: ServicePolicy) -> Self {
        Self {
            quotations: deps.quotations,
            approvals: deps.approvals,
            versions: deps.versions,
            sequences: deps.sequences,
            mail: deps.mail,
            renderer: deps.renderer,
            audit: deps.audit,
            policy,
        }
    }

    fn pad_width(&self, document_type: DocumentType) -> usize {
        match document_type {
            DocumentType::Quotation => self.policy.quotation_pad_width,
            DocumentType::ServiceOrder => self.policy.service_order_pad_width,
        }
    }

    fn emit(
        &self,
        quotation_id: Option<&QuotationId>,
        event_type: &str,
        category: AuditCategory,
        actor: &str,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let correlation_id =
            quotation_id.map(|id| id.0.clone()).unwrap_or_else(|| "system".to_string());
        let mut event = AuditEvent::new(
            quotation_id.cloned(),
            correlation_id,
            event_type,
            category,
            actor,
            outcome,
        );
        for (key, value) in metadata {
            event = event.with_metadata(*key, value.clone());
        }
        self.audit.emit(event);
    }

    async fn load(&self, id: &QuotationId) -> Result<Quotation, ServiceError> {
        self.quotations
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("quotation", id.0.clone()).into())
    }

    pub async fn create(&self, input: NewQuotation) -> Result<Quotation, ServiceError> {
        validate_validity_window(input.issue_date, input.expiration_date)?;
        validate_percentage("discount_pct", input.discount_pct)?;
        validate_percentage("tax_pct", input.tax_pct)?;

        let items = input
            .items
            .into_iter()
            .map(LineItem::new)
            .collect::<Result<Vec<_>, _>>()?;
        let totals = compute_totals(&items, input.discount_pct, input.tax_pct);

        let year = input.issue_date.year();
        let sequence = self.sequences.next(DocumentType::Quotation, year).await?;
        let code = format_code(
            DocumentType::Quotation,
            year,
            sequence,
            self.pad_width(DocumentType::Quotation),
        );

        let now = Utc::now();
        let quotation = Quotation {
            id: QuotationId::generate(),
            code,
            client_id: input.client_id,
            status: QuotationStatus::Draft,
            issue_date: input.issue_date,
            expiration_date: input.expiration_date,
            totals,
            items,
            notes: input.notes,
            created_by: input.created_by.clone(),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        self.quotations.save(quotation.clone()).await?;

        self.emit(
            Some(&quotation.id),
            "lifecycle.created",
            AuditCategory::Lifecycle,
            &input.created_by,
            AuditOutcome::Success,
            &[("code", quotation.code.clone()), ("year", year.to_string())],
        );
        Ok(quotation)
    }

    pub async fn update(
        &self,
        id: &QuotationId,
        update: QuotationUpdate,
        actor: &str,
    ) -> Result<Quotation, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.require_status("update", QuotationStatus::Draft)?;

        if let Some(issue_date) = update.issue_date {
            quotation.issue_date = issue_date;
        }
        if let Some(expiration_date) = update.expiration_date {
            quotation.expiration_date = expiration_date;
        }
        validate_validity_window(quotation.issue_date, quotation.expiration_date)?;

        let discount_pct = update.discount_pct.unwrap_or(quotation.totals.discount_pct);
        let tax_pct = update.tax_pct.unwrap_or(quotation.totals.tax_pct);
        validate_percentage("discount_pct", discount_pct)?;
        validate_percentage("tax_pct", tax_pct)?;

        if let Some(notes) = update.notes {
            quotation.notes = Some(notes);
        }

        quotation.totals = compute_totals(&quotation.items, discount_pct, tax_pct);
        quotation.updated_by = Some(actor.to_string());
        quotation.updated_at = Utc::now();
        self.quotations.save(quotation.clone()).await?;

        self.emit(
            Some(id),
            "lifecycle.updated",
            AuditCategory::Lifecycle,
            actor,
            AuditOutcome::Success,
            &[("grand_total", quotation.totals.grand_total.to_string())],
        );
        Ok(quotation)
    }

    pub async fn add_line_item(
        &self,
        id: &QuotationId,
        input: NewLineItem,
        actor: &str,
    ) -> Result<Quotation, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.require_status("add line item", QuotationStatus::Draft)?;

        let item = LineItem::new(input)?;
        quotation.items.push(item);
        quotation.totals = compute_totals(
            &quotation.items,
            quotation.totals.discount_pct,
            quotation.totals.tax_pct,
        );
        quotation.updated_by = Some(actor.to_string());
        quotation.updated_at = Utc::now();
        self.quotations.save(quotation.clone()).await?;
        Ok(quotation)
    }

    pub async fn update_line_item(
        &self,
        id: &QuotationId,
        item_id: &LineItemId,
        patch: LineItemPatch,
        actor: &str,
    ) -> Result<Quotation, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.require_status("update line item", QuotationStatus::Draft)?;

        let item = quotation
            .items
            .iter_mut()
            .find(|item| &item.id == item_id)
            .ok_or_else(|| DomainError::not_found("line item", item_id.0.clone()))?;
        item.apply(patch)?;

        quotation.totals = compute_totals(
            &quotation.items,
            quotation.totals.discount_pct,
            quotation.totals.tax_pct,
        );
        quotation.updated_by = Some(actor.to_string());
        quotation.updated_at = Utc::now();
        self.quotations.save(quotation.clone()).await?;
        Ok(quotation)
    }

    pub async fn remove_line_item(
        &self,
        id: &QuotationId,
        item_id: &LineItemId,
        actor: &str,
    ) -> Result<Quotation, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.require_status("remove line item", QuotationStatus::Draft)?;

        let before = quotation.items.len();
        quotation.items.retain(|item| &item.id != item_id);
        if quotation.items.len() == before {
            return Err(DomainError::not_found("line item", item_id.0.clone()).into());
        }

        quotation.totals = compute_totals(
            &quotation.items,
            quotation.totals.discount_pct,
            quotation.totals.tax_pct,
        );
        quotation.updated_by = Some(actor.to_string());
        quotation.updated_at = Utc::now();
        self.quotations.save(quotation.clone()).await?;
        Ok(quotation)
    }

    /// Re-derives every document total from the stored line-item subtotals
    /// and persists the result. Idempotent: with no item change in between,
    /// running it twice yields the same figures.
    pub async fn recalculate(
        &self,
        id: &QuotationId,
        actor: &str,
    ) -> Result<Quotation, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.totals = compute_totals(
            &quotation.items,
            quotation.totals.discount_pct,
            quotation.totals.tax_pct,
        );
        quotation.updated_by = Some(actor.to_string());
        quotation.updated_at = Utc::now();
        self.quotations.save(quotation.clone()).await?;

        self.emit(
            Some(id),
            "lifecycle.recalculated",
            AuditCategory::Lifecycle,
            actor,
            AuditOutcome::Success,
            &[("grand_total", quotation.totals.grand_total.to_string())],
        );
        Ok(quotation)
    }

    /// Submits a draft for internal review. Routing decides the sign-off
    /// tier; a quotation under every threshold is approved on the spot.
    pub async fn submit(
        &self,
        id: &QuotationId,
        actor: &str,
        note: Option<String>,
    ) -> Result<ApprovalOutcome, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.require_status("submit", QuotationStatus::Draft)?;

        let decision = route(
            &self.policy.thresholds,
            quotation.totals.grand_total,
            quotation.totals.discount_pct,
        );

        let Some(level) = decision.level else {
            quotation.transition_to(QuotationStatus::InternallyApproved)?;
            quotation.updated_by = Some(actor.to_string());
            self.quotations.save(quotation.clone()).await?;

            self.emit(
                Some(id),
                "approval.auto_approved",
                AuditCategory::Approval,
                actor,
                AuditOutcome::Success,
                &[("justification", decision.justification)],
            );
            return Ok(ApprovalOutcome { quotation, request: None });
        };

        if let Some(open) = self.approvals.find_open_for_quotation(id).await? {
            return Err(DomainError::AlreadyProcessed {
                id: open.id.0,
                resolution: "Pending".to_string(),
            }
            .into());
        }

        quotation.transition_to(QuotationStatus::InReview)?;
        quotation.updated_by = Some(actor.to_string());
        let request =
            ApprovalRequest::open(id.clone(), level, decision.justification.clone(), actor, note);
        self.approvals.save(request.clone()).await?;
        self.quotations.save(quotation.clone()).await?;

        self.emit(
            Some(id),
            "approval.requested",
            AuditCategory::Approval,
            actor,
            AuditOutcome::Success,
            &[
                ("level", format!("{level:?}")),
                ("justification", decision.justification),
            ],
        );
        Ok(ApprovalOutcome { quotation, request: Some(request) })
    }

    /// Resolves a pending approval. Approval moves the quotation forward;
    /// rejection loops it back to `Draft` for correction.
    pub async fn resolve_approval(
        &self,
        approval_id: &ApprovalRequestId,
        decision: ApprovalDecision,
        actor: &str,
        note: Option<String>,
    ) -> Result<ApprovalOutcome, ServiceError> {
        let mut request = self
            .approvals
            .find_by_id(approval_id)
            .await?
            .ok_or_else(|| DomainError::not_found("approval request", approval_id.0.clone()))?;
        request.resolve(decision, actor, note)?;

        let mut quotation = self.load(&request.quotation_id).await?;
        let next = match decision {
            ApprovalDecision::Approved => QuotationStatus::InternallyApproved,
            ApprovalDecision::Rejected => QuotationStatus::Draft,
        };
        quotation.transition_to(next)?;
        quotation.updated_by = Some(actor.to_string());

        self.approvals.save(request.clone()).await?;
        self.quotations.save(quotation.clone()).await?;

        self.emit(
            Some(&quotation.id),
            "approval.resolved",
            AuditCategory::Approval,
            actor,
            match decision {
                ApprovalDecision::Approved => AuditOutcome::Success,
                ApprovalDecision::Rejected => AuditOutcome::Rejected,
            },
            &[("decision", format!("{decision:?}")), ("level", format!("{:?}", request.level))],
        );
        Ok(ApprovalOutcome { quotation, request: Some(request) })
    }

    /// Marks the quotation as sent and dispatches it to the client with the
    /// rendered document attached. A version snapshot is taken first so the
    /// sent document is always recoverable. Neither a render failure nor a
    /// mail failure rolls the transition back.
    pub async fn send(
        &self,
        id: &QuotationId,
        recipient: &str,
        actor: &str,
    ) -> Result<SendOutcome, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.require_status("send", QuotationStatus::InternallyApproved)?;

        quotation.transition_to(QuotationStatus::Sent)?;
        quotation.updated_by = Some(actor.to_string());

        let snapshot = VersionSnapshot::capture(&quotation, "sent to client", actor)?;
        let snapshot = self.versions.append(snapshot).await?;
        self.quotations.save(quotation.clone()).await?;

        let notification = if self.policy.mail_enabled {
            let attachment = match self.renderer.render(&quotation).await {
                Ok(document) => Some(document.into_attachment(&quotation.code)),
                Err(error) => {
                    warn!(
                        quotation = %quotation.code,
                        error = %error,
                        "document render failed, sending mail without attachment"
                    );
                    self.emit(
                        Some(id),
                        "delivery.render_failed",
                        AuditCategory::Delivery,
                        actor,
                        AuditOutcome::Failed,
                        &[("error", error.to_string())],
                    );
                    None
                }
            };
            let mail = OutboundQuotationMail {
                recipient: recipient.to_string(),
                subject: format!("Cotización {} - {}", quotation.code, self.policy.company_name),
                body_html: format!(
                    "<p>Adjuntamos la cotización <strong>{}</strong> por un total de {}.</p>",
                    quotation.code, quotation.totals.grand_total
                ),
                attachment,
            };
            match self.mail.dispatch(mail).await {
                Ok(receipt) => {
                    self.quotations
                        .record_delivery(DeliveryRecord::new(
                            id.clone(),
                            recipient,
                            true,
                            receipt.provider_message_id.clone(),
                            None,
                        ))
                        .await?;
                    NotificationStatus::Delivered {
                        provider_message_id: receipt.provider_message_id,
                    }
                }
                Err(error) => {
                    let message = error.to_string();
                    self.quotations
                        .record_delivery(DeliveryRecord::new(
                            id.clone(),
                            recipient,
                            false,
                            None,
                            Some(message.clone()),
                        ))
                        .await?;
                    self.emit(
                        Some(id),
                        "delivery.failed",
                        AuditCategory::Delivery,
                        actor,
                        AuditOutcome::Failed,
                        &[("recipient", recipient.to_string()), ("error", message.clone())],
                    );
                    NotificationStatus::Failed { error: message }
                }
            }
        } else {
            NotificationStatus::Disabled
        };

        self.emit(
            Some(id),
            "lifecycle.sent",
            AuditCategory::Lifecycle,
            actor,
            AuditOutcome::Success,
            &[
                ("recipient", recipient.to_string()),
                ("version", snapshot.version_number.to_string()),
            ],
        );
        Ok(SendOutcome { quotation, snapshot, notification })
    }

    pub async fn client_approve(
        &self,
        id: &QuotationId,
        actor: &str,
    ) -> Result<Quotation, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.transition_to(QuotationStatus::ApprovedByClient)?;
        quotation.updated_by = Some(actor.to_string());
        self.quotations.save(quotation.clone()).await?;

        self.emit(
            Some(id),
            "lifecycle.client_approved",
            AuditCategory::Lifecycle,
            actor,
            AuditOutcome::Success,
            &[],
        );
        Ok(quotation)
    }

    /// Client rejection references a catalog reason and carries free-text
    /// remarks; both are mandatory. They are kept on the document notes and
    /// in the audit trail.
    pub async fn client_reject(
        &self,
        id: &QuotationId,
        actor: &str,
        reason_id: &str,
        remarks: &str,
    ) -> Result<Quotation, ServiceError> {
        let reason = find_rejection_reason(reason_id)
            .ok_or_else(|| DomainError::not_found("rejection reason", reason_id))?;
        let remarks = remarks.trim();
        if remarks.len() < 5 {
            return Err(
                DomainError::validation("remarks", "must be at least 5 characters").into()
            );
        }

        let mut quotation = self.load(id).await?;
        quotation.transition_to(QuotationStatus::Rejected)?;
        quotation.updated_by = Some(actor.to_string());
        let note = format!("Client rejection ({}): {remarks}", reason.label);
        quotation.notes = Some(match quotation.notes.take() {
            Some(existing) => format!("{existing}\n{note}"),
            None => note,
        });
        self.quotations.save(quotation.clone()).await?;

        self.emit(
            Some(id),
            "lifecycle.client_rejected",
            AuditCategory::Lifecycle,
            actor,
            AuditOutcome::Rejected,
            &[("reason", reason.id.to_string()), ("remarks", remarks.to_string())],
        );
        Ok(quotation)
    }

    /// Soft delete. Cancellation is legal from any non-terminal state and
    /// keeps the row, its items and its history in place.
    pub async fn cancel(
        &self,
        id: &QuotationId,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Quotation, ServiceError> {
        let mut quotation = self.load(id).await?;
        quotation.transition_to(QuotationStatus::Cancelled)?;
        quotation.updated_by = Some(actor.to_string());
        self.quotations.save(quotation.clone()).await?;

        self.emit(
            Some(id),
            "lifecycle.cancelled",
            AuditCategory::Lifecycle,
            actor,
            AuditOutcome::Success,
            &[("reason", reason.unwrap_or_else(|| "unspecified".to_string()))],
        );
        Ok(quotation)
    }

    pub async fn snapshot(
        &self,
        id: &QuotationId,
        reason: &str,
        actor: &str,
    ) -> Result<VersionSnapshot, ServiceError> {
        let quotation = self.load(id).await?;
        let snapshot = VersionSnapshot::capture(&quotation, reason, actor)?;
        let snapshot = self.versions.append(snapshot).await?;

        self.emit(
            Some(id),
            "lifecycle.snapshot_taken",
            AuditCategory::Lifecycle,
            actor,
            AuditOutcome::Success,
            &[
                ("version", snapshot.version_number.to_string()),
                ("reason", reason.to_string()),
            ],
        );
        Ok(snapshot)
    }

    pub async fn versions(&self, id: &QuotationId) -> Result<Vec<VersionSnapshot>, ServiceError> {
        self.load(id).await?;
        Ok(self.versions.list_for_quotation(id).await?)
    }

    pub async fn version(&self, version_id: &VersionId) -> Result<VersionSnapshot, ServiceError> {
        self.versions
            .find_by_id(version_id)
            .await?
            .ok_or_else(|| DomainError::not_found("version", version_id.0.clone()).into())
    }

    pub async fn deliveries(
        &self,
        id: &QuotationId,
    ) -> Result<Vec<DeliveryRecord>, ServiceError> {
        self.load(id).await?;
        Ok(self.quotations.list_deliveries(id).await?)
    }

    pub async fn get(&self, id: &QuotationId) -> Result<Quotation, ServiceError> {
        self.load(id).await
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Quotation, ServiceError> {
        self.quotations
            .find_by_code(code)
            .await?
            .ok_or_else(|| DomainError::not_found("quotation", code).into())
    }

    pub async fn list(&self, filter: QuotationFilter) -> Result<Vec<Quotation>, ServiceError> {
        Ok(self.quotations.list(filter).await?)
    }

    /// Preview of the next document code for a type and year. Informational
    /// only: nothing is consumed, and a concurrent `create` can take it.
    pub async fn peek_next_code(
        &self,
        document_type: DocumentType,
        year: i32,
    ) -> Result<(i64, String), ServiceError> {
        let sequence = self.sequences.peek(document_type, year).await?;
        let code = format_code(document_type, year, sequence, self.pad_width(document_type));
        Ok((sequence, code))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use mekanos_core::audit::InMemoryAuditSink;
    use mekanos_core::domain::approval::{ApprovalDecision, ApprovalLevel, ApprovalStatus};
    use mekanos_core::domain::line_item::{LineItemKind, LineItemPatch, NewLineItem};
    use mekanos_core::domain::quotation::{Quotation, QuotationStatus};
    use mekanos_core::errors::DomainError;
    use mekanos_core::numbering::DocumentType;
    use mekanos_db::repositories::{
        InMemoryApprovalRepository, InMemoryQuotationRepository, InMemorySequenceCounter,
        InMemoryVersionRepository,
    };

    use crate::mail::{DeliveryReceipt, MailDispatcher, MailError, OutboundQuotationMail};
    use crate::pdf::{DocumentRenderer, PdfError, RenderedDocument};
    use crate::service::{
        NewQuotation, NotificationStatus, QuotationService, QuotationUpdate, ServiceDeps,
        ServiceError, ServicePolicy,
    };

    struct StubMailDispatcher {
        fail: bool,
        sent: Mutex<Vec<OutboundQuotationMail>>,
    }

    impl StubMailDispatcher {
        fn new(fail: bool) -> Self {
            Self { fail, sent: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl MailDispatcher for StubMailDispatcher {
        async fn dispatch(
            &self,
            mail: OutboundQuotationMail,
        ) -> Result<DeliveryReceipt, MailError> {
            if self.fail {
                return Err(MailError::Gateway { status: 502, body: "upstream down".to_string() });
            }
            self.sent.lock().expect("lock").push(mail);
            Ok(DeliveryReceipt { provider_message_id: Some("msg-1".to_string()) })
        }
    }

    struct StubRenderer {
        fail: bool,
    }

    #[async_trait]
    impl DocumentRenderer for StubRenderer {
        async fn render(&self, _quotation: &Quotation) -> Result<RenderedDocument, PdfError> {
            if self.fail {
                return Err(PdfError::Template("template missing".to_string()));
            }
            Ok(RenderedDocument::Pdf(b"%PDF-1.4 stub".to_vec()))
        }
    }

    struct Harness {
        service: QuotationService,
        audit: InMemoryAuditSink,
        mail: Arc<StubMailDispatcher>,
    }

    fn harness(policy: ServicePolicy, mail_fails: bool) -> Harness {
        harness_with(policy, mail_fails, false)
    }

    fn harness_with(policy: ServicePolicy, mail_fails: bool, render_fails: bool) -> Harness {
        let audit = InMemoryAuditSink::default();
        let mail = Arc::new(StubMailDispatcher::new(mail_fails));
        let service = QuotationService::new(
            ServiceDeps {
                quotations: Arc::new(InMemoryQuotationRepository::new()),
                approvals: Arc::new(InMemoryApprovalRepository::new()),
                versions: Arc::new(InMemoryVersionRepository::new()),
                sequences: Arc::new(InMemorySequenceCounter::new()),
                mail: mail.clone(),
                renderer: Arc::new(StubRenderer { fail: render_fails }),
                audit: Arc::new(audit.clone()),
            },
            policy,
        );
        Harness { service, audit, mail }
    }

    fn new_quotation(unit_price: i64, discount_pct: i64) -> NewQuotation {
        NewQuotation {
            client_id: "client-77".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2025, 2, 10).expect("date"),
            expiration_date: NaiveDate::from_ymd_opt(2025, 3, 10).expect("date"),
            discount_pct: Decimal::from(discount_pct),
            tax_pct: Decimal::from(19),
            notes: None,
            items: vec![
                NewLineItem {
                    kind: LineItemKind::Service,
                    description: "pump overhaul".to_string(),
                    quantity: Decimal::from(1),
                    unit_price: Decimal::from(unit_price),
                    discount_pct: Decimal::ZERO,
                    warranty_months: Some(6),
                },
                NewLineItem {
                    kind: LineItemKind::Component,
                    description: "mechanical seal".to_string(),
                    quantity: Decimal::from(2),
                    unit_price: Decimal::from(250_000),
                    discount_pct: Decimal::from(10),
                    warranty_months: None,
                },
            ],
            created_by: "emp-4".to_string(),
        }
    }

    async fn approved_quotation(harness: &Harness) -> Quotation {
        let quotation =
            harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");
        let outcome =
            harness.service.submit(&quotation.id, "emp-4", None).await.expect("submit");
        assert!(outcome.request.is_none(), "small quotation should auto-approve");
        outcome.quotation
    }

    #[tokio::test]
    async fn create_assigns_yearly_codes_and_computes_totals() {
        let harness = harness(ServicePolicy::default(), false);

        let first = harness.service.create(new_quotation(1_500_000, 10)).await.expect("first");
        let second =
            harness.service.create(new_quotation(1_500_000, 10)).await.expect("second");

        assert_eq!(first.code, "COT-2025-0001");
        assert_eq!(second.code, "COT-2025-0002");
        assert_eq!(first.status, QuotationStatus::Draft);
        assert_eq!(first.totals.grand_total.to_string(), "2088450.00");
        assert_eq!(first.totals.services_subtotal.to_string(), "1500000.00");
        assert_eq!(first.totals.components_subtotal.to_string(), "450000.00");
    }

    #[tokio::test]
    async fn create_rejects_expiration_before_issue() {
        let harness = harness(ServicePolicy::default(), false);
        let mut input = new_quotation(1_500_000, 0);
        input.expiration_date = input.issue_date;

        let error = harness.service.create(input).await.expect_err("window must be invalid");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::Validation { field: "expiration_date", .. })
        ));
    }

    #[tokio::test]
    async fn update_recomputes_totals_and_rejects_non_draft() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation = harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");

        let updated = harness
            .service
            .update(
                &quotation.id,
                QuotationUpdate { discount_pct: Some(Decimal::ZERO), ..Default::default() },
                "emp-5",
            )
            .await
            .expect("update draft");
        assert_eq!(updated.totals.discount_amount.to_string(), "0.00");
        assert_eq!(updated.updated_by.as_deref(), Some("emp-5"));

        harness.service.submit(&quotation.id, "emp-4", None).await.expect("submit");
        let error = harness
            .service
            .update(&quotation.id, QuotationUpdate::default(), "emp-5")
            .await
            .expect_err("non-draft update must fail");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::InvalidState { operation: "update", .. })
        ));
    }

    #[tokio::test]
    async fn line_item_changes_keep_totals_consistent() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation = harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");

        let with_extra = harness
            .service
            .add_line_item(
                &quotation.id,
                NewLineItem {
                    kind: LineItemKind::Component,
                    description: "coupling".to_string(),
                    quantity: Decimal::from(1),
                    unit_price: Decimal::from(100_000),
                    discount_pct: Decimal::ZERO,
                    warranty_months: None,
                },
                "emp-4",
            )
            .await
            .expect("add item");
        assert_eq!(with_extra.items.len(), 3);
        assert_eq!(with_extra.totals.components_subtotal.to_string(), "550000.00");

        let removed_id = with_extra.items[2].id.clone();
        let without = harness
            .service
            .remove_line_item(&quotation.id, &removed_id, "emp-4")
            .await
            .expect("remove item");
        assert_eq!(without.items.len(), 2);
        assert_eq!(without.totals.grand_total, quotation.totals.grand_total);

        let error = harness
            .service
            .remove_line_item(&quotation.id, &removed_id, "emp-4")
            .await
            .expect_err("removing twice must fail");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::NotFound { entity: "line item", .. })
        ));
    }

    #[tokio::test]
    async fn line_item_patch_revalidates_and_recomputes() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation = harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");
        let component_id = quotation.items[1].id.clone();

        let patched = harness
            .service
            .update_line_item(
                &quotation.id,
                &component_id,
                LineItemPatch { quantity: Some(Decimal::from(4)), ..Default::default() },
                "emp-4",
            )
            .await
            .expect("patch item");
        assert_eq!(patched.totals.components_subtotal.to_string(), "900000.00");

        let error = harness
            .service
            .update_line_item(
                &quotation.id,
                &component_id,
                LineItemPatch { discount_pct: Some(Decimal::from(120)), ..Default::default() },
                "emp-4",
            )
            .await
            .expect_err("invalid discount must fail");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::Validation { field: "discount_pct", .. })
        ));
    }

    #[tokio::test]
    async fn recalculation_is_idempotent() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation =
            harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");

        let first = harness.service.recalculate(&quotation.id, "emp-4").await.expect("first");
        let second = harness.service.recalculate(&quotation.id, "emp-4").await.expect("second");

        assert_eq!(first.totals, quotation.totals);
        assert_eq!(second.totals, first.totals);
        assert_eq!(second.totals.grand_total.to_string(), "2088450.00");
    }

    #[tokio::test]
    async fn submit_under_thresholds_approves_without_request() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation = approved_quotation(&harness).await;

        assert_eq!(quotation.status, QuotationStatus::InternallyApproved);
        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "approval.auto_approved"));
    }

    #[tokio::test]
    async fn submit_above_supervisor_threshold_opens_request() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation =
            harness.service.create(new_quotation(8_000_000, 10)).await.expect("create");

        let outcome = harness.service.submit(&quotation.id, "emp-4", None).await.expect("submit");
        let request = outcome.request.expect("request should be opened");

        assert_eq!(outcome.quotation.status, QuotationStatus::InReview);
        assert_eq!(request.level, ApprovalLevel::Supervisor);
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert!(request.justification.contains("supervisor"));
    }

    #[tokio::test]
    async fn deep_discount_routes_to_manager() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation =
            harness.service.create(new_quotation(1_500_000, 30)).await.expect("create");

        let outcome = harness.service.submit(&quotation.id, "emp-4", None).await.expect("submit");
        assert_eq!(outcome.request.expect("request").level, ApprovalLevel::Manager);
    }

    #[tokio::test]
    async fn approval_resolution_moves_quotation_forward_or_back() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation =
            harness.service.create(new_quotation(8_000_000, 10)).await.expect("create");
        let outcome = harness.service.submit(&quotation.id, "emp-4", None).await.expect("submit");
        let request = outcome.request.expect("request");

        let rejected = harness
            .service
            .resolve_approval(
                &request.id,
                ApprovalDecision::Rejected,
                "sup-1",
                Some("discount too deep for this client".to_string()),
            )
            .await
            .expect("reject");
        assert_eq!(rejected.quotation.status, QuotationStatus::Draft);

        let outcome = harness.service.submit(&quotation.id, "emp-4", None).await.expect("resubmit");
        let request = outcome.request.expect("second request");
        let approved = harness
            .service
            .resolve_approval(&request.id, ApprovalDecision::Approved, "sup-1", None)
            .await
            .expect("approve");
        assert_eq!(approved.quotation.status, QuotationStatus::InternallyApproved);
    }

    #[tokio::test]
    async fn approval_cannot_be_resolved_twice() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation =
            harness.service.create(new_quotation(8_000_000, 10)).await.expect("create");
        let outcome = harness.service.submit(&quotation.id, "emp-4", None).await.expect("submit");
        let request = outcome.request.expect("request");

        harness
            .service
            .resolve_approval(&request.id, ApprovalDecision::Approved, "sup-1", None)
            .await
            .expect("first resolution");
        let error = harness
            .service
            .resolve_approval(&request.id, ApprovalDecision::Rejected, "sup-2", None)
            .await
            .expect_err("second resolution must fail");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::AlreadyProcessed { .. })
        ));
    }

    #[tokio::test]
    async fn send_snapshots_dispatches_and_records_delivery() {
        let policy = ServicePolicy { mail_enabled: true, ..ServicePolicy::default() };
        let harness = harness(policy, false);
        let quotation = approved_quotation(&harness).await;

        let outcome = harness
            .service
            .send(&quotation.id, "compras@client77.example", "emp-4")
            .await
            .expect("send");

        assert_eq!(outcome.quotation.status, QuotationStatus::Sent);
        assert_eq!(outcome.snapshot.version_number, 1);
        assert!(matches!(outcome.notification, NotificationStatus::Delivered { .. }));
        {
            let sent = harness.mail.sent.lock().expect("lock");
            assert_eq!(sent.len(), 1);
            let attachment = sent[0].attachment.as_ref().expect("document attached");
            assert_eq!(attachment.filename, format!("{}.pdf", quotation.code));
            assert_eq!(attachment.content_type, "application/pdf");
            assert!(!attachment.content.is_empty());
        }

        let deliveries = harness.service.deliveries(&quotation.id).await.expect("deliveries");
        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].success);

        let versions = harness.service.versions(&quotation.id).await.expect("versions");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].reason, "sent to client");
        assert_eq!(versions[0].payload["status"], serde_json::json!("Sent"));
    }

    #[tokio::test]
    async fn mail_failure_still_sends_and_records_failed_delivery() {
        let policy = ServicePolicy { mail_enabled: true, ..ServicePolicy::default() };
        let harness = harness(policy, true);
        let quotation = approved_quotation(&harness).await;

        let outcome = harness
            .service
            .send(&quotation.id, "compras@client77.example", "emp-4")
            .await
            .expect("send survives mail failure");

        assert_eq!(outcome.quotation.status, QuotationStatus::Sent);
        assert!(matches!(outcome.notification, NotificationStatus::Failed { .. }));

        let deliveries = harness.service.deliveries(&quotation.id).await.expect("deliveries");
        assert_eq!(deliveries.len(), 1);
        assert!(!deliveries[0].success);
        assert!(deliveries[0].error.as_deref().unwrap_or("").contains("502"));
    }

    #[tokio::test]
    async fn render_failure_sends_mail_without_attachment() {
        let policy = ServicePolicy { mail_enabled: true, ..ServicePolicy::default() };
        let harness = harness_with(policy, false, true);
        let quotation = approved_quotation(&harness).await;

        let outcome = harness
            .service
            .send(&quotation.id, "compras@client77.example", "emp-4")
            .await
            .expect("send survives render failure");

        assert_eq!(outcome.quotation.status, QuotationStatus::Sent);
        assert!(matches!(outcome.notification, NotificationStatus::Delivered { .. }));

        let sent = harness.mail.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].attachment.is_none());
        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "delivery.render_failed"));
    }

    #[tokio::test]
    async fn send_with_mail_disabled_skips_dispatch() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation = approved_quotation(&harness).await;

        let outcome = harness
            .service
            .send(&quotation.id, "compras@client77.example", "emp-4")
            .await
            .expect("send");

        assert!(matches!(outcome.notification, NotificationStatus::Disabled));
        assert!(harness.mail.sent.lock().expect("lock").is_empty());
        let deliveries = harness.service.deliveries(&quotation.id).await.expect("deliveries");
        assert!(deliveries.is_empty());
    }

    #[tokio::test]
    async fn send_requires_internal_approval_first() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation =
            harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");

        let error = harness
            .service
            .send(&quotation.id, "compras@client77.example", "emp-4")
            .await
            .expect_err("draft cannot be sent");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::InvalidState { operation: "send", .. })
        ));
    }

    #[tokio::test]
    async fn client_decisions_require_sent_state_and_reason_on_reject() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation = approved_quotation(&harness).await;
        harness
            .service
            .send(&quotation.id, "compras@client77.example", "emp-4")
            .await
            .expect("send");

        let error = harness
            .service
            .client_reject(&quotation.id, "emp-4", "bad_weather", "price above budget")
            .await
            .expect_err("unknown catalog reason must fail");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::NotFound { entity: "rejection reason", .. })
        ));

        let error = harness
            .service
            .client_reject(&quotation.id, "emp-4", "price", "   ")
            .await
            .expect_err("blank remarks must fail");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::Validation { field: "remarks", .. })
        ));

        let error = harness
            .service
            .client_reject(&quotation.id, "emp-4", "price", "no")
            .await
            .expect_err("too-short remarks must fail");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::Validation { field: "remarks", .. })
        ));

        let rejected = harness
            .service
            .client_reject(&quotation.id, "emp-4", "price", "price above budget")
            .await
            .expect("reject with reason and remarks");
        assert_eq!(rejected.status, QuotationStatus::Rejected);
        let notes = rejected.notes.as_deref().unwrap_or("");
        assert!(notes.contains("Precio fuera de presupuesto"));
        assert!(notes.contains("price above budget"));

        let error = harness
            .service
            .client_approve(&quotation.id, "emp-4")
            .await
            .expect_err("terminal state accepts no decision");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_works_from_open_states_only() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation =
            harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");

        let cancelled = harness
            .service
            .cancel(&quotation.id, "emp-4", Some("client went silent".to_string()))
            .await
            .expect("cancel draft");
        assert_eq!(cancelled.status, QuotationStatus::Cancelled);

        let error = harness
            .service
            .cancel(&quotation.id, "emp-4", None)
            .await
            .expect_err("cancelled is terminal");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn manual_snapshots_number_sequentially() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation =
            harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");

        let first = harness
            .service
            .snapshot(&quotation.id, "before discount negotiation", "emp-4")
            .await
            .expect("first snapshot");
        let second = harness
            .service
            .snapshot(&quotation.id, "after discount negotiation", "emp-4")
            .await
            .expect("second snapshot");

        assert_eq!(first.version_number, 1);
        assert_eq!(second.version_number, 2);

        let fetched = harness.service.version(&second.id).await.expect("fetch by id");
        assert_eq!(fetched.reason, "after discount negotiation");
    }

    #[tokio::test]
    async fn peek_previews_without_consuming() {
        let harness = harness(ServicePolicy::default(), false);

        let (sequence, code) = harness
            .service
            .peek_next_code(DocumentType::Quotation, 2025)
            .await
            .expect("peek");
        assert_eq!(sequence, 1);
        assert_eq!(code, "COT-2025-0001");

        let quotation =
            harness.service.create(new_quotation(1_500_000, 10)).await.expect("create");
        assert_eq!(quotation.code, "COT-2025-0001");

        let (_, next) = harness
            .service
            .peek_next_code(DocumentType::Quotation, 2025)
            .await
            .expect("peek again");
        assert_eq!(next, "COT-2025-0002");

        let (_, ods) = harness
            .service
            .peek_next_code(DocumentType::ServiceOrder, 2025)
            .await
            .expect("peek service order");
        assert_eq!(ods, "ODS-2025-0001");
    }

    #[tokio::test]
    async fn lifecycle_emits_audit_trail() {
        let harness = harness(ServicePolicy::default(), false);
        let quotation = approved_quotation(&harness).await;
        harness
            .service
            .send(&quotation.id, "compras@client77.example", "emp-4")
            .await
            .expect("send");

        let events = harness.audit.events();
        let types: Vec<&str> = events.iter().map(|event| event.event_type.as_str()).collect();
        assert!(types.contains(&"lifecycle.created"));
        assert!(types.contains(&"approval.auto_approved"));
        assert!(types.contains(&"lifecycle.sent"));
        assert!(events
            .iter()
            .all(|event| event.quotation_id.as_ref() == Some(&quotation.id)));
    }
}
