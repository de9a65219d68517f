use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use mekanos_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let entries: Vec<(&str, String, Option<&str>)> = vec![
        ("database.url", config.database.url.clone(), Some("MEKANOS_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("MEKANOS_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            Some("MEKANOS_SERVER_BIND_ADDRESS"),
        ),
        ("server.port", config.server.port.to_string(), Some("MEKANOS_SERVER_PORT")),
        (
            "approvals.supervisor_total",
            config.approvals.supervisor_total.to_string(),
            Some("MEKANOS_APPROVALS_SUPERVISOR_TOTAL"),
        ),
        (
            "approvals.manager_total",
            config.approvals.manager_total.to_string(),
            Some("MEKANOS_APPROVALS_MANAGER_TOTAL"),
        ),
        (
            "approvals.supervisor_discount_pct",
            config.approvals.supervisor_discount_pct.to_string(),
            Some("MEKANOS_APPROVALS_SUPERVISOR_DISCOUNT_PCT"),
        ),
        (
            "approvals.manager_discount_pct",
            config.approvals.manager_discount_pct.to_string(),
            Some("MEKANOS_APPROVALS_MANAGER_DISCOUNT_PCT"),
        ),
        (
            "numbering.quotation_pad_width",
            config.numbering.quotation_pad_width.to_string(),
            None,
        ),
        ("mail.enabled", config.mail.enabled.to_string(), Some("MEKANOS_MAIL_ENABLED")),
        (
            "mail.gateway_url",
            config.mail.gateway_url.clone().unwrap_or_else(|| "(unset)".to_string()),
            Some("MEKANOS_MAIL_GATEWAY_URL"),
        ),
        (
            "mail.api_key",
            if config.mail.api_key.is_some() { "***redacted***" } else { "(unset)" }.to_string(),
            Some("MEKANOS_MAIL_API_KEY"),
        ),
        ("mail.from_address", config.mail.from_address.clone(), Some("MEKANOS_MAIL_FROM_ADDRESS")),
        ("pdf.template_dir", config.pdf.template_dir.clone(), Some("MEKANOS_PDF_TEMPLATE_DIR")),
        ("pdf.company_name", config.pdf.company_name.clone(), Some("MEKANOS_PDF_COMPANY_NAME")),
        ("logging.level", config.logging.level.clone(), Some("MEKANOS_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("MEKANOS_LOGGING_FORMAT")),
    ];

    for (key, value, env_var) in entries {
        let source = field_source(key, env_var, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("  {key} = {value}  [{source}]"));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("mekanos.toml"), PathBuf::from("config/mekanos.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key: &str,
    env_var: Option<&str>,
    doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if let Some(var) = env_var {
        if env::var(var).map(|value| !value.trim().is_empty()).unwrap_or(false) {
            return format!("env:{var}");
        }
    }

    if let (Some(doc), Some(path)) = (doc, file_path) {
        let mut cursor = Some(doc);
        for part in key.split('.') {
            cursor = cursor.and_then(|value| value.get(part));
        }
        if cursor.is_some() {
            return format!("file:{}", path.display());
        }
    }

    "default".to_string()
}
