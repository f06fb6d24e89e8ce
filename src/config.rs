use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration, layered from `config/{default,<env>}.toml`
/// files and `APP_`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
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
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Payment gateway API base URL
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Shared gateway secret: bearer token for API calls and HMAC key for
    /// webhook signature verification. No default on purpose.
    #[validate(length(min = 16))]
    pub gateway_secret_key: String,

    /// Request timeout for outbound gateway calls, in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Settlement currency passed to the gateway
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Transactional email service endpoint; emails are skipped when unset
    #[serde(default)]
    pub notifier_url: Option<String>,

    /// From-address reported to the email service
    #[serde(default = "default_notifier_from")]
    pub notifier_from: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_gateway_base_url() -> String {
    "https://api.paystack.co".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_currency() -> String {
    "KES".to_string()
}

fn default_notifier_from() -> String {
    "orders@storefront.example".to_string()
}

impl AppConfig {
    /// Handy constructor for tests and embedded use.
    pub fn new(database_url: String, gateway_secret_key: String, environment: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            gateway_base_url: default_gateway_base_url(),
            gateway_secret_key,
            gateway_timeout_secs: default_gateway_timeout_secs(),
            currency: default_currency(),
            notifier_url: None,
            notifier_from: default_notifier_from(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Loads configuration for the current environment.
///
/// `gateway_secret_key` has no default; it must come from a config file or
/// the `APP_GATEWAY_SECRET_KEY` environment variable so an insecure default
/// can never reach production.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("gateway_secret_key").is_err() {
        return Err(ConfigError::NotFound(
            "gateway_secret_key must be set via config file or APP_GATEWAY_SECRET_KEY".to_string(),
        ));
    }

    config.try_deserialize()
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured
/// level when present.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_fills_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "sk_test_0123456789abcdef".to_string(),
            "test".to_string(),
        );
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.currency, "KES");
        assert_eq!(cfg.gateway_timeout_secs, 15);
        assert!(!cfg.is_production());
        assert!(cfg.notifier_url.is_none());
    }

    #[test]
    fn secret_length_is_validated() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "short".to_string(),
            "test".to_string(),
        );
        assert!(cfg.validate().is_err());
    }
}
