use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_ENDPOINT: &str = "https://test-payment.momo.vn/v2/gateway/api/create";
const DEFAULT_RETURN_URL: &str = "http://localhost:3000/orders-page/";

/// Payment gateway credentials and request defaults
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub partner_code: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_gateway_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default)]
    pub ipn_url: String,
    #[serde(default = "default_request_type")]
    pub request_type: String,
    #[serde(default = "default_partner_name")]
    pub partner_name: String,
    #[serde(default = "default_store_id")]
    pub store_id: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Outbound call timeout in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,
    /// Serve fake payment links and accept every callback signature
    #[serde(default)]
    pub mock_mode: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            partner_code: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint: default_gateway_endpoint(),
            redirect_url: String::new(),
            ipn_url: String::new(),
            request_type: default_request_type(),
            partner_name: default_partner_name(),
            store_id: default_store_id(),
            lang: default_lang(),
            timeout_secs: default_gateway_timeout_secs(),
            mock_mode: false,
        }
    }
}

impl GatewayConfig {
    /// Credentials are only required when talking to the real gateway.
    fn validate_credentials(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.mock_mode {
            return Ok(());
        }
        for (field, value) in [
            ("partner_code", &self.partner_code),
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
            ("endpoint", &self.endpoint),
        ] {
            if value.trim().is_empty() {
                let mut err = ValidationError::new("gateway_credentials");
                err.message = Some(
                    format!(
                        "gateway.{} must be set unless gateway.mock_mode is enabled",
                        field
                    )
                    .into(),
                );
                errors.add(field, err);
            }
        }
        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Rules deciding when a large order must put down a deposit
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DepositPolicy {
    /// Total ordered units at or above which a deposit is required
    #[serde(default = "default_deposit_threshold")]
    #[validate(range(min = 1))]
    pub quantity_threshold: i32,
    /// Share of the discounted total collected up front
    #[serde(default = "default_deposit_ratio")]
    pub ratio: Decimal,
    /// Name of the payment method recorded against deposit rows
    #[serde(default = "default_deposit_method")]
    pub method_name: String,
}

impl Default for DepositPolicy {
    fn default() -> Self {
        Self {
            quantity_threshold: default_deposit_threshold(),
            ratio: default_deposit_ratio(),
            method_name: default_deposit_method(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the in-process domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Storefront page the gateway return endpoint redirects to
    #[serde(default = "default_return_url")]
    pub frontend_return_url: String,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    #[validate]
    pub deposit: DepositPolicy,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            frontend_return_url: default_return_url(),
            gateway: GatewayConfig::default(),
            deposit: DepositPolicy::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        self.gateway.validate_credentials()?;

        if self.is_production() && self.gateway.mock_mode {
            let mut errors = ValidationErrors::new();
            let mut err = ValidationError::new("gateway_mock_mode");
            err.message = Some("gateway.mock_mode must not be enabled in production".into());
            errors.add("gateway", err);
            return Err(errors);
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_return_url() -> String {
    DEFAULT_RETURN_URL.to_string()
}

fn default_gateway_endpoint() -> String {
    DEFAULT_GATEWAY_ENDPOINT.to_string()
}
fn default_request_type() -> String {
    "captureWallet".to_string()
}
fn default_partner_name() -> String {
    "Plant Shop".to_string()
}
fn default_store_id() -> String {
    "PlantShop".to_string()
}
fn default_lang() -> String {
    "vi".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_deposit_threshold() -> i32 {
    10
}
fn default_deposit_ratio() -> Decimal {
    dec!(0.5)
}
fn default_deposit_method() -> String {
    "momo".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("plantshop_orders={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

pub(crate) fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://plantshop.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    fn write_config(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(format!("{}.toml", name)), content).unwrap();
    }

    #[test]
    fn real_gateway_requires_credentials() {
        let cfg = base_config();
        let err = cfg.validate_additional_constraints().unwrap_err();
        assert!(err.field_errors().contains_key("secret_key"));
        assert!(err.field_errors().contains_key("access_key"));
    }

    #[test]
    fn mock_gateway_skips_credentials() {
        let mut cfg = base_config();
        cfg.gateway.mock_mode = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn mock_gateway_rejected_in_production() {
        let mut cfg = base_config();
        cfg.gateway.mock_mode = true;
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn deposit_policy_defaults() {
        let policy = DepositPolicy::default();
        assert_eq!(policy.quantity_threshold, 10);
        assert_eq!(policy.ratio, dec!(0.5));
        assert_eq!(policy.method_name, "momo");
    }

    #[test]
    fn loads_layered_files() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "default",
            r#"
                database_url = "sqlite::memory:"
                log_level = "debug"

                [gateway]
                mock_mode = true
            "#,
        );
        write_config(
            &dir,
            "staging",
            r#"
                port = 9090

                [deposit]
                quantity_threshold = 20
            "#,
        );

        let cfg = load_config_from(dir.path(), "staging").unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.deposit.quantity_threshold, 20);
        assert!(cfg.gateway.mock_mode);
        assert_eq!(cfg.gateway.request_type, "captureWallet");
    }

    #[test]
    fn rejects_unknown_log_level() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "default",
            r#"
                log_level = "loud"

                [gateway]
                mock_mode = true
            "#,
        );

        let result = load_config_from(dir.path(), "qa");
        assert!(matches!(result, Err(AppConfigError::Validation(_))));
    }

    #[test]
    fn event_channel_needs_capacity() {
        let mut cfg = base_config();
        cfg.gateway.mock_mode = true;
        assert!(cfg.validate().is_ok());

        cfg.event_channel_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.field_errors().contains_key("event_channel_capacity"));
    }
}
