use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::totals::line_subtotal;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineItemId(pub String);

impl LineItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Services and components are billed the same way but persisted in separate
/// tables and subtotaled separately on the quotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineItemKind {
    Service,
    Component,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub kind: LineItemKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_pct: Decimal,
    pub subtotal: Decimal,
    pub warranty_months: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewLineItem {
    pub kind: LineItemKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_pct: Decimal,
    pub warranty_months: Option<u32>,
}

/// Partial update for a line item; absent fields keep their current value.
///
/// `warranty_months` is doubly optional so the wire format can tell "leave it
/// alone" (field absent) apart from "clear it" (explicit `null`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LineItemPatch {
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub discount_pct: Option<Decimal>,
    #[serde(default, deserialize_with = "warranty_field")]
    pub warranty_months: Option<Option<u32>>,
}

fn warranty_field<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Some)
}

impl LineItem {
    /// Validates the billable inputs and fixes the rounded subtotal at
    /// creation time. The stored subtotal is what document totals re-sum.
    pub fn new(input: NewLineItem) -> Result<Self, DomainError> {
        if input.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("quantity", "must be greater than zero"));
        }
        if input.unit_price < Decimal::ZERO {
            return Err(DomainError::validation("unit_price", "must not be negative"));
        }
        validate_percentage("discount_pct", input.discount_pct)?;
        if input.description.trim().is_empty() {
            return Err(DomainError::validation("description", "must not be empty"));
        }

        let subtotal = line_subtotal(input.quantity, input.unit_price, input.discount_pct);

        Ok(Self {
            id: LineItemId::generate(),
            kind: input.kind,
            description: input.description,
            quantity: input.quantity,
            unit_price: input.unit_price,
            discount_pct: input.discount_pct,
            subtotal,
            warranty_months: input.warranty_months,
        })
    }

    /// Applies a partial update and re-fixes the rounded subtotal. Validation
    /// matches `new`, so a patched item is never less constrained than a
    /// freshly created one.
    pub fn apply(&mut self, patch: LineItemPatch) -> Result<(), DomainError> {
        let quantity = patch.quantity.unwrap_or(self.quantity);
        let unit_price = patch.unit_price.unwrap_or(self.unit_price);
        let discount_pct = patch.discount_pct.unwrap_or(self.discount_pct);

        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("quantity", "must be greater than zero"));
        }
        if unit_price < Decimal::ZERO {
            return Err(DomainError::validation("unit_price", "must not be negative"));
        }
        validate_percentage("discount_pct", discount_pct)?;
        if let Some(description) = &patch.description {
            if description.trim().is_empty() {
                return Err(DomainError::validation("description", "must not be empty"));
            }
        }

        if let Some(description) = patch.description {
            self.description = description;
        }
        self.quantity = quantity;
        self.unit_price = unit_price;
        self.discount_pct = discount_pct;
        if let Some(warranty_months) = patch.warranty_months {
            self.warranty_months = warranty_months;
        }
        self.subtotal = line_subtotal(self.quantity, self.unit_price, self.discount_pct);
        Ok(())
    }
}

pub fn validate_percentage(field: &'static str, value: Decimal) -> Result<(), DomainError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(DomainError::validation(field, "must be between 0 and 100"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use crate::domain::line_item::{LineItem, LineItemKind, LineItemPatch, NewLineItem};
    use crate::errors::DomainError;

    fn input() -> NewLineItem {
        NewLineItem {
            kind: LineItemKind::Service,
            description: "preventive maintenance, 150 kVA generator".to_string(),
            quantity: Decimal::from(2),
            unit_price: Decimal::from(250_000),
            discount_pct: Decimal::from(10),
            warranty_months: Some(6),
        }
    }

    #[test]
    fn computes_rounded_subtotal_on_creation() {
        let item = LineItem::new(input()).expect("valid item");
        assert_eq!(item.subtotal, Decimal::from_str("450000.00").expect("decimal"));
    }

    #[test]
    fn rejects_zero_quantity() {
        let error = LineItem::new(NewLineItem { quantity: Decimal::ZERO, ..input() })
            .expect_err("zero quantity must fail");
        assert!(matches!(error, DomainError::Validation { field: "quantity", .. }));
    }

    #[test]
    fn rejects_negative_unit_price() {
        let error = LineItem::new(NewLineItem { unit_price: Decimal::from(-1), ..input() })
            .expect_err("negative price must fail");
        assert!(matches!(error, DomainError::Validation { field: "unit_price", .. }));
    }

    #[test]
    fn rejects_discount_above_hundred() {
        let error = LineItem::new(NewLineItem { discount_pct: Decimal::from(101), ..input() })
            .expect_err("discount above 100 must fail");
        assert!(matches!(error, DomainError::Validation { field: "discount_pct", .. }));
    }

    #[test]
    fn patch_recomputes_subtotal_and_keeps_unpatched_fields() {
        let mut item = LineItem::new(input()).expect("valid item");
        item.apply(LineItemPatch { quantity: Some(Decimal::from(3)), ..Default::default() })
            .expect("valid patch");

        assert_eq!(item.quantity, Decimal::from(3));
        assert_eq!(item.unit_price, Decimal::from(250_000));
        assert_eq!(item.subtotal, Decimal::from_str("675000.00").expect("decimal"));
    }

    #[test]
    fn patch_rejects_invalid_discount() {
        let mut item = LineItem::new(input()).expect("valid item");
        let error = item
            .apply(LineItemPatch { discount_pct: Some(Decimal::from(120)), ..Default::default() })
            .expect_err("discount above 100 must fail");
        assert!(matches!(error, DomainError::Validation { field: "discount_pct", .. }));
        assert_eq!(item.discount_pct, Decimal::from(10), "failed patch must not mutate");
    }

    #[test]
    fn patch_can_clear_or_keep_warranty() {
        let mut item = LineItem::new(input()).expect("valid item");

        // Absent field in the JSON keeps the current warranty.
        let keep: LineItemPatch = serde_json::from_str(r#"{"quantity": "3"}"#).expect("patch");
        item.apply(keep).expect("valid patch");
        assert_eq!(item.warranty_months, Some(6));

        // Explicit null clears it.
        let clear: LineItemPatch =
            serde_json::from_str(r#"{"warranty_months": null}"#).expect("patch");
        item.apply(clear).expect("valid patch");
        assert_eq!(item.warranty_months, None);

        item.apply(LineItemPatch { warranty_months: Some(Some(12)), ..Default::default() })
            .expect("valid patch");
        assert_eq!(item.warranty_months, Some(12));
    }

    #[test]
    fn rejects_blank_description() {
        let error = LineItem::new(NewLineItem { description: "   ".to_string(), ..input() })
            .expect_err("blank description must fail");
        assert!(matches!(error, DomainError::Validation { field: "description", .. }));
    }
}
