pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod numbering;
pub mod routing;
pub mod totals;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::approval::{
    ApprovalDecision, ApprovalLevel, ApprovalRequest, ApprovalRequestId, ApprovalStatus,
};
pub use domain::delivery::DeliveryRecord;
pub use domain::line_item::{LineItem, LineItemId, LineItemKind, LineItemPatch, NewLineItem};
pub use domain::quotation::{Quotation, QuotationId, QuotationStatus};
pub use domain::rejection::{find_rejection_reason, RejectionReason, REJECTION_REASONS};
pub use domain::version::{VersionId, VersionSnapshot};
pub use errors::DomainError;
pub use numbering::{format_code, DocumentType};
pub use routing::{route, ApprovalThresholds, RoutingDecision};
pub use totals::{compute_totals, line_subtotal, round_money, QuotationTotals};
