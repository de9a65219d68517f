//! Approval routing: decides which sign-off tier a quotation needs based on
//! its grand total and document discount. Thresholds come from configuration;
//! comparisons are strictly greater-than, so a total exactly at a threshold
//! does not trigger that tier.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalLevel;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalThresholds {
    pub supervisor_total: Decimal,
    pub manager_total: Decimal,
    pub supervisor_discount_pct: Decimal,
    pub manager_discount_pct: Decimal,
}

impl Default for ApprovalThresholds {
    fn default() -> Self {
        Self {
            supervisor_total: Decimal::from(5_000_000),
            manager_total: Decimal::from(15_000_000),
            supervisor_discount_pct: Decimal::from(15),
            manager_discount_pct: Decimal::from(25),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// `None` means the quotation can be approved without sign-off.
    pub level: Option<ApprovalLevel>,
    pub justification: String,
}

/// Pure decision function. Manager is checked before supervisor so the
/// highest applicable tier wins.
pub fn route(
    thresholds: &ApprovalThresholds,
    grand_total: Decimal,
    discount_pct: Decimal,
) -> RoutingDecision {
    if grand_total > thresholds.manager_total {
        return RoutingDecision {
            level: Some(ApprovalLevel::Manager),
            justification: format!(
                "grand total {grand_total} exceeds manager threshold {}",
                thresholds.manager_total
            ),
        };
    }
    if discount_pct > thresholds.manager_discount_pct {
        return RoutingDecision {
            level: Some(ApprovalLevel::Manager),
            justification: format!(
                "discount {discount_pct}% exceeds manager threshold {}%",
                thresholds.manager_discount_pct
            ),
        };
    }
    if grand_total > thresholds.supervisor_total {
        return RoutingDecision {
            level: Some(ApprovalLevel::Supervisor),
            justification: format!(
                "grand total {grand_total} exceeds supervisor threshold {}",
                thresholds.supervisor_total
            ),
        };
    }
    if discount_pct > thresholds.supervisor_discount_pct {
        return RoutingDecision {
            level: Some(ApprovalLevel::Supervisor),
            justification: format!(
                "discount {discount_pct}% exceeds supervisor threshold {}%",
                thresholds.supervisor_discount_pct
            ),
        };
    }

    RoutingDecision {
        level: None,
        justification: "total and discount are within auto-approval limits".to_string(),
    }
}
