use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::ApprovalThresholds;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub approvals: ApprovalThresholds,
    pub numbering: NumberingConfig,
    pub mail: MailConfig,
    pub pdf: PdfConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NumberingConfig {
    pub quotation_pad_width: usize,
    pub service_order_pad_width: usize,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub enabled: bool,
    pub gateway_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub from_address: String,
}

#[derive(Clone, Debug)]
pub struct PdfConfig {
    pub template_dir: String,
    pub company_name: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub mail_enabled: Option<bool>,
    pub mail_gateway_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub pdf_template_dir: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("config file required but not found at `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("config interpolation references unset environment variable `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("config interpolation `${{...}}` is missing its closing brace")]
    UnterminatedInterpolation,
    #[error("environment override `{key}` has unusable value `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://mekanos.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            approvals: ApprovalThresholds::default(),
            numbering: NumberingConfig { quotation_pad_width: 4, service_order_pad_width: 4 },
            mail: MailConfig {
                enabled: false,
                gateway_url: None,
                api_key: None,
                from_address: "cotizaciones@mekanos.example".to_string(),
            },
            pdf: PdfConfig {
                template_dir: "templates/quotations".to_string(),
                company_name: "MEKANOS S.A.S".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("mekanos.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(approvals) = patch.approvals {
            if let Some(supervisor_total) = approvals.supervisor_total {
                self.approvals.supervisor_total = supervisor_total;
            }
            if let Some(manager_total) = approvals.manager_total {
                self.approvals.manager_total = manager_total;
            }
            if let Some(supervisor_discount_pct) = approvals.supervisor_discount_pct {
                self.approvals.supervisor_discount_pct = supervisor_discount_pct;
            }
            if let Some(manager_discount_pct) = approvals.manager_discount_pct {
                self.approvals.manager_discount_pct = manager_discount_pct;
            }
        }

        if let Some(numbering) = patch.numbering {
            if let Some(quotation_pad_width) = numbering.quotation_pad_width {
                self.numbering.quotation_pad_width = quotation_pad_width;
            }
            if let Some(service_order_pad_width) = numbering.service_order_pad_width {
                self.numbering.service_order_pad_width = service_order_pad_width;
            }
        }

        if let Some(mail) = patch.mail {
            if let Some(enabled) = mail.enabled {
                self.mail.enabled = enabled;
            }
            if let Some(gateway_url) = mail.gateway_url {
                self.mail.gateway_url = Some(gateway_url);
            }
            if let Some(mail_api_key_value) = mail.api_key {
                self.mail.api_key = Some(SecretString::from(mail_api_key_value));
            }
            if let Some(from_address) = mail.from_address {
                self.mail.from_address = from_address;
            }
        }

        if let Some(pdf) = patch.pdf {
            if let Some(template_dir) = pdf.template_dir {
                self.pdf.template_dir = template_dir;
            }
            if let Some(company_name) = pdf.company_name {
                self.pdf.company_name = company_name;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MEKANOS_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("MEKANOS_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("MEKANOS_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("MEKANOS_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("MEKANOS_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MEKANOS_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("MEKANOS_SERVER_PORT") {
            self.server.port = parse_u16("MEKANOS_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("MEKANOS_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("MEKANOS_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("MEKANOS_APPROVALS_SUPERVISOR_TOTAL") {
            self.approvals.supervisor_total =
                parse_decimal("MEKANOS_APPROVALS_SUPERVISOR_TOTAL", &value)?;
        }
        if let Some(value) = read_env("MEKANOS_APPROVALS_MANAGER_TOTAL") {
            self.approvals.manager_total = parse_decimal("MEKANOS_APPROVALS_MANAGER_TOTAL", &value)?;
        }
        if let Some(value) = read_env("MEKANOS_APPROVALS_SUPERVISOR_DISCOUNT_PCT") {
            self.approvals.supervisor_discount_pct =
                parse_decimal("MEKANOS_APPROVALS_SUPERVISOR_DISCOUNT_PCT", &value)?;
        }
        if let Some(value) = read_env("MEKANOS_APPROVALS_MANAGER_DISCOUNT_PCT") {
            self.approvals.manager_discount_pct =
                parse_decimal("MEKANOS_APPROVALS_MANAGER_DISCOUNT_PCT", &value)?;
        }

        if let Some(value) = read_env("MEKANOS_MAIL_ENABLED") {
            self.mail.enabled = parse_bool("MEKANOS_MAIL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("MEKANOS_MAIL_GATEWAY_URL") {
            self.mail.gateway_url = Some(value);
        }
        if let Some(value) = read_env("MEKANOS_MAIL_API_KEY") {
            self.mail.api_key = Some(SecretString::from(value));
        }
        if let Some(value) = read_env("MEKANOS_MAIL_FROM_ADDRESS") {
            self.mail.from_address = value;
        }

        if let Some(value) = read_env("MEKANOS_PDF_TEMPLATE_DIR") {
            self.pdf.template_dir = value;
        }
        if let Some(value) = read_env("MEKANOS_PDF_COMPANY_NAME") {
            self.pdf.company_name = value;
        }

        if let Some(value) = read_env("MEKANOS_LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("MEKANOS_LOGGING_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.mail_enabled {
            self.mail.enabled = enabled;
        }
        if let Some(gateway_url) = overrides.mail_gateway_url {
            self.mail.gateway_url = Some(gateway_url);
        }
        if let Some(mail_api_key_value) = overrides.mail_api_key {
            self.mail.api_key = Some(SecretString::from(mail_api_key_value));
        }
        if let Some(template_dir) = overrides.pdf_template_dir {
            self.pdf.template_dir = template_dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_approvals(&self.approvals)?;
        validate_numbering(&self.numbering)?;
        validate_mail(&self.mail)?;
        validate_pdf(&self.pdf)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("mekanos.toml"), PathBuf::from("config/mekanos.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let key = &after[..end];
        let value = env::var(key)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    if server.graceful_shutdown_secs > 120 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be at most 120".to_string(),
        ));
    }
    Ok(())
}

fn validate_approvals(approvals: &ApprovalThresholds) -> Result<(), ConfigError> {
    if approvals.supervisor_total < Decimal::ZERO || approvals.manager_total < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "approvals thresholds must not be negative".to_string(),
        ));
    }
    if approvals.manager_total <= approvals.supervisor_total {
        return Err(ConfigError::Validation(
            "approvals.manager_total must be greater than approvals.supervisor_total".to_string(),
        ));
    }
    for (name, value) in [
        ("approvals.supervisor_discount_pct", approvals.supervisor_discount_pct),
        ("approvals.manager_discount_pct", approvals.manager_discount_pct),
    ] {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Validation(format!("{name} must be in range 0..=100")));
        }
    }
    if approvals.manager_discount_pct <= approvals.supervisor_discount_pct {
        return Err(ConfigError::Validation(
            "approvals.manager_discount_pct must be greater than approvals.supervisor_discount_pct"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_numbering(numbering: &NumberingConfig) -> Result<(), ConfigError> {
    for (name, width) in [
        ("numbering.quotation_pad_width", numbering.quotation_pad_width),
        ("numbering.service_order_pad_width", numbering.service_order_pad_width),
    ] {
        if !(3..=8).contains(&width) {
            return Err(ConfigError::Validation(format!("{name} must be in range 3..=8")));
        }
    }
    Ok(())
}

fn validate_mail(mail: &MailConfig) -> Result<(), ConfigError> {
    if !mail.enabled {
        return Ok(());
    }

    let missing_gateway =
        mail.gateway_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
    if missing_gateway {
        return Err(ConfigError::Validation(
            "mail.gateway_url is required when mail.enabled is true".to_string(),
        ));
    }

    let missing_key = mail
        .api_key
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing_key {
        return Err(ConfigError::Validation(
            "mail.api_key is required when mail.enabled is true".to_string(),
        ));
    }

    if !mail.from_address.contains('@') {
        return Err(ConfigError::Validation(
            "mail.from_address must be an email address".to_string(),
        ));
    }

    Ok(())
}

fn validate_pdf(pdf: &PdfConfig) -> Result<(), ConfigError> {
    if pdf.template_dir.trim().is_empty() {
        return Err(ConfigError::Validation("pdf.template_dir must not be empty".to_string()));
    }
    if pdf.company_name.trim().is_empty() {
        return Err(ConfigError::Validation("pdf.company_name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    match logging.level.trim().to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "logging.level `{other}` is not one of trace|debug|info|warn|error"
        ))),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim())
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    approvals: Option<ApprovalsPatch>,
    numbering: Option<NumberingPatch>,
    mail: Option<MailPatch>,
    pdf: Option<PdfPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalsPatch {
    supervisor_total: Option<Decimal>,
    manager_total: Option<Decimal>,
    supervisor_discount_pct: Option<Decimal>,
    manager_discount_pct: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct NumberingPatch {
    quotation_pad_width: Option<usize>,
    service_order_pad_width: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct MailPatch {
    enabled: Option<bool>,
    gateway_url: Option<String>,
    api_key: Option<String>,
    from_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PdfPatch {
    template_dir: Option<String>,
    company_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rust_decimal::Decimal;

    use crate::config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    fn load_from_file(contents: &str) -> Result<AppConfig, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
    }

    #[test]
    fn defaults_pass_validation() {
        let config = AppConfig::default();
        config.validate().expect("default config must be valid");
        assert_eq!(config.approvals.supervisor_total, Decimal::from(5_000_000));
        assert_eq!(config.numbering.quotation_pad_width, 4);
    }

    #[test]
    fn file_patch_overrides_thresholds_and_logging() {
        let config = load_from_file(
            r#"
            [approvals]
            supervisor_total = 1000000
            manager_total = 3000000
            supervisor_discount_pct = 10
            manager_discount_pct = 20

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .expect("config loads");

        assert_eq!(config.approvals.supervisor_total, Decimal::from(1_000_000));
        assert_eq!(config.approvals.manager_discount_pct, Decimal::from(20));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let error = load_from_file(
            r#"
            [approvals]
            supervisor_total = 9000000
            manager_total = 3000000
            "#,
        )
        .expect_err("inverted thresholds must fail validation");

        assert!(error.to_string().contains("manager_total"));
    }

    #[test]
    fn enabled_mail_requires_gateway_and_key() {
        let error = load_from_file(
            r#"
            [mail]
            enabled = true
            "#,
        )
        .expect_err("mail without gateway must fail");

        assert!(error.to_string().contains("mail.gateway_url"));
    }

    #[test]
    fn non_sqlite_database_url_is_rejected() {
        let error = load_from_file(
            r#"
            [database]
            url = "postgres://localhost/mekanos"
            "#,
        )
        .expect_err("non-sqlite url must fail");

        assert!(error.to_string().contains("database.url"));
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect_err("missing required file must fail");

        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn unterminated_interpolation_is_an_error() {
        let error = load_from_file("[database]\nurl = \"${MEKANOS_UNTERMINATED").expect_err(
            "unterminated interpolation must fail",
        );
        assert!(matches!(
            error,
            ConfigError::UnterminatedInterpolation | ConfigError::MissingEnvInterpolation { .. }
        ));
    }

    #[test]
    fn programmatic_overrides_win_over_defaults() {
        let config = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: false,
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                log_level: Some("warn".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .expect("overrides load");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.logging.level, "warn");
    }
}
