//! Catalog of client rejection reasons. A rejection always references one of
//! these entries; free-form detail goes in the remarks.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RejectionReason {
    pub id: &'static str,
    pub label: &'static str,
}

pub const REJECTION_REASONS: &[RejectionReason] = &[
    RejectionReason { id: "price", label: "Precio fuera de presupuesto" },
    RejectionReason { id: "delivery_time", label: "Tiempo de entrega" },
    RejectionReason { id: "scope", label: "Alcance insuficiente" },
    RejectionReason { id: "competitor", label: "Adjudicado a otro proveedor" },
    RejectionReason { id: "project_cancelled", label: "Proyecto cancelado" },
    RejectionReason { id: "other", label: "Otro motivo" },
];

pub fn find_rejection_reason(id: &str) -> Option<&'static RejectionReason> {
    REJECTION_REASONS.iter().find(|reason| reason.id == id)
}
