//! Document code formats. The transactional counter that guarantees
//! uniqueness lives in the persistence crate; this module only knows how to
//! spell the codes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Quotation,
    ServiceOrder,
}

impl DocumentType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Quotation => "COT",
            Self::ServiceOrder => "ODS",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quotation => "quotation",
            Self::ServiceOrder => "service_order",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quotation" => Ok(Self::Quotation),
            "service_order" => Ok(Self::ServiceOrder),
            other => Err(DomainError::validation(
                "document_type",
                format!("unknown document type `{other}` (expected quotation|service_order)"),
            )),
        }
    }
}

/// `{PREFIX}-{YEAR}-{SEQUENCE}` with the sequence zero-padded to `pad_width`
/// digits. Sequences beyond the pad width keep all their digits.
pub fn format_code(document_type: DocumentType, year: i32, sequence: i64, pad_width: usize) -> String {
    format!("{}-{year}-{sequence:0pad_width$}", document_type.prefix())
}
