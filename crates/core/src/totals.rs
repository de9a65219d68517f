//! Monetary totals for a quotation.
//!
//! Every multiplication or division result is rounded half-up to 2 decimal
//! places before it feeds the next step. Line-item subtotals are persisted
//! already rounded, and document totals are derived by re-summing those stored
//! values, so a full-precision accumulate-then-round-once implementation would
//! drift from the persisted figures.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::line_item::{LineItem, LineItemKind};

/// Round half up to 2 decimal places.
///
/// The result always carries a scale of exactly 2, so integer-valued amounts
/// serialize as `1500000.00` rather than `1500000`. Persisted columns and API
/// payloads rely on that canonical form.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Subtotal of a single line item: gross amount, minus its own discount,
/// rounded at each step.
pub fn line_subtotal(quantity: Decimal, unit_price: Decimal, discount_pct: Decimal) -> Decimal {
    let gross = round_money(quantity * unit_price);
    let discount_amount = round_money(gross * discount_pct / Decimal::ONE_HUNDRED);
    round_money(gross - discount_amount)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationTotals {
    pub services_subtotal: Decimal,
    pub components_subtotal: Decimal,
    pub combined_subtotal: Decimal,
    pub discount_pct: Decimal,
    pub discount_amount: Decimal,
    pub subtotal_after_discount: Decimal,
    pub tax_pct: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
}

impl QuotationTotals {
    /// Totals of a freshly created quotation: every amount is zero, only the
    /// chosen percentages are carried.
    pub fn zero(discount_pct: Decimal, tax_pct: Decimal) -> Self {
        let zero = round_money(Decimal::ZERO);
        Self {
            services_subtotal: zero,
            components_subtotal: zero,
            combined_subtotal: zero,
            discount_pct,
            discount_amount: zero,
            subtotal_after_discount: zero,
            tax_pct,
            tax_amount: zero,
            grand_total: zero,
        }
    }
}

/// Compute document-level totals from the already-rounded line subtotals.
///
/// Pure function: no side effects, assumes pre-validated percentages in
/// `[0, 100]`.
pub fn compute_totals(
    items: &[LineItem],
    discount_pct: Decimal,
    tax_pct: Decimal,
) -> QuotationTotals {
    let services_subtotal = round_money(
        items
            .iter()
            .filter(|item| item.kind == LineItemKind::Service)
            .map(|item| item.subtotal)
            .sum(),
    );
    let components_subtotal = round_money(
        items
            .iter()
            .filter(|item| item.kind == LineItemKind::Component)
            .map(|item| item.subtotal)
            .sum(),
    );
    let combined_subtotal = round_money(services_subtotal + components_subtotal);
    let discount_amount = round_money(combined_subtotal * discount_pct / Decimal::ONE_HUNDRED);
    let subtotal_after_discount = round_money(combined_subtotal - discount_amount);
    let tax_amount = round_money(subtotal_after_discount * tax_pct / Decimal::ONE_HUNDRED);
    let grand_total = round_money(subtotal_after_discount + tax_amount);

    QuotationTotals {
        services_subtotal,
        components_subtotal,
        combined_subtotal,
        discount_pct,
        discount_amount,
        subtotal_after_discount,
        tax_pct,
        tax_amount,
        grand_total,
    }
}
