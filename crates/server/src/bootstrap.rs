use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use mekanos_core::audit::TracingAuditSink;
use mekanos_core::config::{AppConfig, ConfigError, LoadOptions};
use mekanos_db::repositories::{
    SqlApprovalRepository, SqlQuotationRepository, SqlSequenceCounter, SqlVersionRepository,
};
use mekanos_db::{connect_with_settings, migrations, DbPool};

use crate::mail::{HttpMailDispatcher, MailDispatcher, NoopMailDispatcher};
use crate::pdf::{PdfError, QuotationRenderer};
use crate::routes::AppState;
use crate::service::{QuotationService, ServiceDeps, ServicePolicy};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("document renderer failed to initialize: {0}")]
    Renderer(#[from] PdfError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let mail: Arc<dyn MailDispatcher> = match (
        config.mail.enabled,
        config.mail.gateway_url.clone(),
        config.mail.api_key.clone(),
    ) {
        (true, Some(gateway_url), Some(api_key)) => Arc::new(HttpMailDispatcher::new(
            gateway_url,
            api_key,
            config.mail.from_address.clone(),
        )),
        _ => Arc::new(NoopMailDispatcher),
    };

    let renderer = match QuotationRenderer::new(&config.pdf.template_dir, &config.pdf.company_name)
    {
        Ok(renderer) => renderer,
        Err(error) => {
            warn!(
                template_dir = %config.pdf.template_dir,
                error = %error,
                "template directory unusable, using embedded templates"
            );
            QuotationRenderer::with_embedded_templates(&config.pdf.company_name)?
        }
    };
    let renderer = Arc::new(renderer);

    let service = QuotationService::new(
        ServiceDeps {
            quotations: Arc::new(SqlQuotationRepository::new(db_pool.clone())),
            approvals: Arc::new(SqlApprovalRepository::new(db_pool.clone())),
            versions: Arc::new(SqlVersionRepository::new(db_pool.clone())),
            sequences: Arc::new(SqlSequenceCounter::new(db_pool.clone())),
            mail,
            renderer: renderer.clone(),
            audit: Arc::new(TracingAuditSink),
        },
        ServicePolicy {
            thresholds: config.approvals.clone(),
            quotation_pad_width: config.numbering.quotation_pad_width,
            service_order_pad_width: config.numbering.service_order_pad_width,
            mail_enabled: config.mail.enabled,
            company_name: config.pdf.company_name.clone(),
        },
    );

    let state = AppState { service: Arc::new(service), renderer };
    Ok(Application { config, db_pool, state })
}
