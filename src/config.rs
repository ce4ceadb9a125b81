use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CURRENCY: &str = "VND";
const CONFIG_DIR: &str = "config";

/// VNPay gateway credentials (redirect flow, HMAC-SHA512 signed URLs)
#[derive(Clone, Debug, Deserialize)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    #[serde(default = "default_vnpay_payment_url")]
    pub payment_url: String,
    /// Where VNPay redirects the shopper after payment
    pub return_url: String,
}

fn default_vnpay_payment_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}

/// MoMo gateway credentials (redirect flow, HMAC-SHA256 signed requests)
#[derive(Clone, Debug, Deserialize)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_momo_create_url")]
    pub create_url: String,
    pub redirect_url: String,
    pub ipn_url: String,
}

fn default_momo_create_url() -> String {
    "https://test-payment.momo.vn/v2/gateway/api/create".to_string()
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
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

    /// Currency new carts are opened in
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Base URL of the catalog service (price/stock/name lookups)
    pub catalog_base_url: String,

    /// Base URL of the identity provider (bearer token resolution)
    pub identity_base_url: String,

    /// Comma-separated list of allowed CORS origins; unset means permissive
    /// CORS outside production
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    pub vnpay: VnpayConfig,
    pub momo: MomoConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
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

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration from layered sources:
/// `config/default.toml`, `config/{environment}.toml`, then `APP_*`
/// environment variables (e.g. `APP_DATABASE_URL`, `APP_VNPAY__HASH_SECRET`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let config = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(
        environment = %app_config.environment,
        "configuration loaded"
    );
    Ok(app_config)
}

/// Initializes the tracing subscriber with an env-filter built from the
/// configured log level (`RUST_LOG` overrides when set).
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
