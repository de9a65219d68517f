//! Demo data for local environments. Idempotent per code: seeding an
//! already-seeded database skips quotations whose codes exist.

use chrono::{Datelike, Duration, Utc};
use rust_decimal::Decimal;

use mekanos_core::domain::line_item::{LineItem, LineItemKind, NewLineItem};
use mekanos_core::domain::quotation::{Quotation, QuotationId, QuotationStatus};
use mekanos_core::errors::DomainError;
use mekanos_core::numbering::{format_code, DocumentType};
use mekanos_core::totals::compute_totals;

use crate::repositories::{
    QuotationRepository, RepositoryError, SequenceCounter, SqlQuotationRepository,
    SqlSequenceCounter,
};
use crate::DbPool;

#[derive(Debug, Default)]
pub struct SeedSummary {
    pub quotations_created: usize,
    pub quotations_skipped: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

struct DemoQuotation {
    client_id: &'static str,
    discount_pct: Decimal,
    notes: Option<&'static str>,
    items: Vec<NewLineItem>,
}

fn demo_quotations() -> Vec<DemoQuotation> {
    vec![
        DemoQuotation {
            client_id: "client-acme-mining",
            discount_pct: Decimal::from(10),
            notes: Some("includes on-site commissioning"),
            items: vec![
                NewLineItem {
                    kind: LineItemKind::Service,
                    description: "centrifugal pump overhaul".to_string(),
                    quantity: Decimal::from(1),
                    unit_price: Decimal::from(1_500_000),
                    discount_pct: Decimal::ZERO,
                    warranty_months: Some(6),
                },
                NewLineItem {
                    kind: LineItemKind::Component,
                    description: "mechanical seal, 45mm".to_string(),
                    quantity: Decimal::from(2),
                    unit_price: Decimal::from(250_000),
                    discount_pct: Decimal::from(10),
                    warranty_months: Some(12),
                },
            ],
        },
        DemoQuotation {
            client_id: "client-rio-textiles",
            discount_pct: Decimal::ZERO,
            notes: None,
            items: vec![NewLineItem {
                kind: LineItemKind::Service,
                description: "gearbox vibration analysis".to_string(),
                quantity: Decimal::from(3),
                unit_price: Decimal::from(420_000),
                discount_pct: Decimal::from(5),
                warranty_months: None,
            }],
        },
    ]
}

pub async fn seed_demo(pool: &DbPool) -> Result<SeedSummary, SeedError> {
    let quotations = SqlQuotationRepository::new(pool.clone());
    let counter = SqlSequenceCounter::new(pool.clone());

    let now = Utc::now();
    let year = now.year();
    let tax_pct = Decimal::from(19);

    let mut summary = SeedSummary::default();
    for demo in demo_quotations() {
        let sequence = counter.next(DocumentType::Quotation, year).await?;
        let code = format_code(DocumentType::Quotation, year, sequence, 4);
        if quotations.find_by_code(&code).await?.is_some() {
            summary.quotations_skipped += 1;
            continue;
        }

        let items = demo
            .items
            .into_iter()
            .map(LineItem::new)
            .collect::<Result<Vec<_>, _>>()?;
        let totals = compute_totals(&items, demo.discount_pct, tax_pct);

        let quotation = Quotation {
            id: QuotationId::generate(),
            code,
            client_id: demo.client_id.to_string(),
            status: QuotationStatus::Draft,
            issue_date: now.date_naive(),
            expiration_date: now.date_naive() + Duration::days(30),
            totals,
            items,
            notes: demo.notes.map(str::to_string),
            created_by: "seed".to_string(),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        quotations.save(quotation).await?;
        summary.quotations_created += 1;
    }

    tracing::info!(
        created = summary.quotations_created,
        skipped = summary.quotations_skipped,
        "demo data seeded",
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::seed_demo;
    use crate::repositories::{QuotationFilter, QuotationRepository, SqlQuotationRepository};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_creates_draft_quotations_with_codes() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let summary = seed_demo(&pool).await.expect("seed");
        assert_eq!(summary.quotations_created, 2);

        let repo = SqlQuotationRepository::new(pool);
        let all = repo.list(QuotationFilter::default()).await.expect("list");
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|quotation| quotation.code.starts_with("COT-")));
    }
}
