//! HTTP surface for the quotation service. Thin handlers: decode, delegate,
//! map errors to status codes.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mekanos_core::domain::approval::{ApprovalDecision, ApprovalRequestId};
use mekanos_core::domain::line_item::{LineItemId, LineItemPatch, NewLineItem};
use mekanos_core::domain::quotation::QuotationId;
use mekanos_core::domain::version::VersionId;
use mekanos_core::errors::DomainError;
use mekanos_core::numbering::DocumentType;
use mekanos_db::repositories::quotation::parse_quotation_status;
use mekanos_db::repositories::QuotationFilter;

use crate::pdf::QuotationRenderer;
use crate::service::{
    NewQuotation, NotificationStatus, QuotationService, QuotationUpdate, ServiceError,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QuotationService>,
    pub renderer: Arc<QuotationRenderer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/quotations", post(create_quotation).get(list_quotations))
        .route("/quotations/{id}", get(get_quotation).patch(update_quotation))
        .route("/quotations/{id}/items", post(add_line_item))
        .route(
            "/quotations/{id}/items/{item_id}",
            put(update_line_item).delete(remove_line_item),
        )
        .route("/quotations/{id}/recalculate", post(recalculate_quotation))
        .route("/quotations/{id}/submit", post(submit_quotation))
        .route("/quotations/{id}/send", post(send_quotation))
        .route("/quotations/{id}/client-decision", post(client_decision))
        .route("/rejection-reasons", get(list_rejection_reasons))
        .route("/quotations/{id}/cancel", post(cancel_quotation))
        .route("/quotations/{id}/versions", get(list_versions).post(take_snapshot))
        .route("/quotations/{id}/deliveries", get(list_deliveries))
        .route("/quotations/{id}/document", get(render_document))
        .route("/versions/{id}", get(get_version))
        .route("/approvals/{id}/resolve", post(resolve_approval))
        .route("/numbering/{document_type}/{year}", get(peek_numbering))
        .with_state(state)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        let status = match &error {
            ServiceError::Domain(DomainError::Validation { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Domain(DomainError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Domain(
                DomainError::InvalidState { .. }
                | DomainError::InvalidTransition { .. }
                | DomainError::AlreadyProcessed { .. },
            ) => StatusCode::CONFLICT,
            ServiceError::Repository(_) | ServiceError::Snapshot(_) => {
                tracing::error!(error = %error, "internal error while handling request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self { status, message: error.to_string() }
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        ServiceError::Domain(error).into()
    }
}

fn unprocessable(message: impl Into<String>) -> ApiError {
    ApiError { status: StatusCode::UNPROCESSABLE_ENTITY, message: message.into() }
}

#[derive(Deserialize)]
struct CreateQuotationRequest {
    client_id: String,
    issue_date: NaiveDate,
    expiration_date: NaiveDate,
    discount_pct: Decimal,
    tax_pct: Decimal,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    items: Vec<NewLineItem>,
    created_by: String,
}

async fn create_quotation(
    State(state): State<AppState>,
    Json(request): Json<CreateQuotationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quotation = state
        .service
        .create(NewQuotation {
            client_id: request.client_id,
            issue_date: request.issue_date,
            expiration_date: request.expiration_date,
            discount_pct: request.discount_pct,
            tax_pct: request.tax_pct,
            notes: request.notes,
            items: request.items,
            created_by: request.created_by,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(quotation)))
}

#[derive(Deserialize)]
struct ListParams {
    status: Option<String>,
    client_id: Option<String>,
    limit: Option<u32>,
}

async fn list_quotations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(parse_quotation_status)
        .transpose()
        .map_err(|e| unprocessable(e.to_string()))?;

    let quotations = state
        .service
        .list(QuotationFilter { status, client_id: params.client_id, limit: params.limit })
        .await?;
    Ok(Json(quotations))
}

async fn get_quotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let quotation = state.service.get(&QuotationId(id)).await?;
    Ok(Json(quotation))
}

#[derive(Deserialize)]
struct UpdateQuotationRequest {
    #[serde(default)]
    issue_date: Option<NaiveDate>,
    #[serde(default)]
    expiration_date: Option<NaiveDate>,
    #[serde(default)]
    discount_pct: Option<Decimal>,
    #[serde(default)]
    tax_pct: Option<Decimal>,
    #[serde(default)]
    notes: Option<String>,
    actor: String,
}

async fn update_quotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateQuotationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quotation = state
        .service
        .update(
            &QuotationId(id),
            QuotationUpdate {
                issue_date: request.issue_date,
                expiration_date: request.expiration_date,
                discount_pct: request.discount_pct,
                tax_pct: request.tax_pct,
                notes: request.notes,
            },
            &request.actor,
        )
        .await?;
    Ok(Json(quotation))
}

#[derive(Deserialize)]
struct AddLineItemRequest {
    item: NewLineItem,
    actor: String,
}

async fn add_line_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddLineItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quotation =
        state.service.add_line_item(&QuotationId(id), request.item, &request.actor).await?;
    Ok(Json(quotation))
}

#[derive(Deserialize)]
struct UpdateLineItemRequest {
    patch: LineItemPatch,
    actor: String,
}

async fn update_line_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(String, String)>,
    Json(request): Json<UpdateLineItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quotation = state
        .service
        .update_line_item(&QuotationId(id), &LineItemId(item_id), request.patch, &request.actor)
        .await?;
    Ok(Json(quotation))
}

#[derive(Deserialize)]
struct ActorParams {
    actor: Option<String>,
}

async fn remove_line_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(String, String)>,
    Query(params): Query<ActorParams>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = params.actor.unwrap_or_else(|| "system".to_string());
    let quotation = state
        .service
        .remove_line_item(&QuotationId(id), &LineItemId(item_id), &actor)
        .await?;
    Ok(Json(quotation))
}

async fn recalculate_quotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = params.actor.unwrap_or_else(|| "system".to_string());
    let quotation = state.service.recalculate(&QuotationId(id), &actor).await?;
    Ok(Json(quotation))
}

#[derive(Deserialize)]
struct SubmitRequest {
    actor: String,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Serialize)]
struct ApprovalOutcomeResponse {
    quotation: mekanos_core::domain::quotation::Quotation,
    request: Option<mekanos_core::domain::approval::ApprovalRequest>,
}

async fn submit_quotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome =
        state.service.submit(&QuotationId(id), &request.actor, request.note).await?;
    Ok(Json(ApprovalOutcomeResponse {
        quotation: outcome.quotation,
        request: outcome.request,
    }))
}

#[derive(Deserialize)]
struct ResolveApprovalRequest {
    decision: ApprovalDecision,
    actor: String,
    #[serde(default)]
    note: Option<String>,
}

async fn resolve_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveApprovalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .service
        .resolve_approval(
            &ApprovalRequestId(id),
            request.decision,
            &request.actor,
            request.note,
        )
        .await?;
    Ok(Json(ApprovalOutcomeResponse {
        quotation: outcome.quotation,
        request: outcome.request,
    }))
}

#[derive(Deserialize)]
struct SendRequest {
    recipient: String,
    actor: String,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum NotificationResponse {
    Delivered { provider_message_id: Option<String> },
    Failed { error: String },
    Disabled,
}

#[derive(Serialize)]
struct SendResponse {
    quotation: mekanos_core::domain::quotation::Quotation,
    version_number: i64,
    notification: NotificationResponse,
}

async fn send_quotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome =
        state.service.send(&QuotationId(id), &request.recipient, &request.actor).await?;
    let notification = match outcome.notification {
        NotificationStatus::Delivered { provider_message_id } => {
            NotificationResponse::Delivered { provider_message_id }
        }
        NotificationStatus::Failed { error } => NotificationResponse::Failed { error },
        NotificationStatus::Disabled => NotificationResponse::Disabled,
    };
    Ok(Json(SendResponse {
        quotation: outcome.quotation,
        version_number: outcome.snapshot.version_number,
        notification,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ClientDecision {
    Approve,
    Reject,
}

#[derive(Deserialize)]
struct ClientDecisionRequest {
    decision: ClientDecision,
    actor: String,
    /// Catalog reason id; mandatory when rejecting.
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    remarks: Option<String>,
}

async fn client_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ClientDecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = QuotationId(id);
    let quotation = match request.decision {
        ClientDecision::Approve => state.service.client_approve(&id, &request.actor).await?,
        ClientDecision::Reject => {
            let reason = request
                .reason
                .ok_or_else(|| unprocessable("rejection requires a catalog reason id"))?;
            let remarks = request.remarks.unwrap_or_default();
            state.service.client_reject(&id, &request.actor, &reason, &remarks).await?
        }
    };
    Ok(Json(quotation))
}

async fn list_rejection_reasons() -> impl IntoResponse {
    Json(mekanos_core::domain::rejection::REJECTION_REASONS)
}

#[derive(Deserialize)]
struct CancelRequest {
    actor: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel_quotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quotation =
        state.service.cancel(&QuotationId(id), &request.actor, request.reason).await?;
    Ok(Json(quotation))
}

async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let versions = state.service.versions(&QuotationId(id)).await?;
    Ok(Json(versions))
}

#[derive(Deserialize)]
struct SnapshotRequest {
    reason: String,
    actor: String,
}

async fn take_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SnapshotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot =
        state.service.snapshot(&QuotationId(id), &request.reason, &request.actor).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.service.version(&VersionId(id)).await?;
    Ok(Json(snapshot))
}

async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deliveries = state.service.deliveries(&QuotationId(id)).await?;
    Ok(Json(deliveries))
}

async fn render_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let quotation = state.service.get(&QuotationId(id)).await?;
    let rendered = state.renderer.render(&quotation).await.map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: e.to_string(),
    })?;
    rendered.into_response(&quotation.code).map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: e.to_string(),
    })
}

#[derive(Serialize)]
struct NumberingPreview {
    document_type: DocumentType,
    year: i32,
    next_sequence: i64,
    next_code: String,
}

async fn peek_numbering(
    State(state): State<AppState>,
    Path((document_type, year)): Path<(String, i32)>,
) -> Result<impl IntoResponse, ApiError> {
    let document_type = DocumentType::from_str(&document_type)?;
    let (next_sequence, next_code) = state.service.peek_next_code(document_type, year).await?;
    Ok(Json(NumberingPreview { document_type, year, next_sequence, next_code }))
}
