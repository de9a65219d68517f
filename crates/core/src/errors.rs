use thiserror::Error;

use crate::domain::quotation::QuotationStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: &'static str, message: String },
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{operation} requires state {required:?}, but quotation is {current:?}")]
    InvalidState {
        operation: &'static str,
        current: QuotationStatus,
        required: QuotationStatus,
    },
    #[error("invalid quotation transition from {from:?} to {to:?}")]
    InvalidTransition { from: QuotationStatus, to: QuotationStatus },
    #[error("approval request `{id}` was already resolved as {resolution}")]
    AlreadyProcessed { id: String, resolution: String },
}

impl DomainError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}
