use crate::models::PriceUnit;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Comex Stat API client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// The public endpoint has served incomplete certificate chains before.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Response cache configuration. A TTL of 0 disables caching for that kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Keep cached responses in DuckDB instead of process memory.
    #[serde(default = "default_true")]
    pub persistent: bool,

    #[serde(default = "default_trade_ttl_secs")]
    pub trade_ttl_secs: u64,

    #[serde(default = "default_description_ttl_secs")]
    pub description_ttl_secs: u64,

    #[serde(default = "default_update_ttl_secs")]
    pub update_ttl_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_history_from_year")]
    pub history_from_year: i32,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub price_unit: PriceUnit,

    #[serde(default = "default_rolling_window_months")]
    pub rolling_window_months: usize,
}

/// Ownership registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_main_sheet")]
    pub main_sheet: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://api-comexstat.mdic.gov.br/".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    250
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_user_agent() -> String {
    "ncm-trade-engine/0.1 (foreign trade statistics research)".to_string()
}
fn default_trade_ttl_secs() -> u64 {
    3600
}
fn default_description_ttl_secs() -> u64 {
    3600
}
fn default_update_ttl_secs() -> u64 {
    86_400
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/ncm.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_history_from_year() -> i32 {
    2004
}
fn default_concurrency() -> usize {
    3
}
fn default_rolling_window_months() -> usize {
    12
}
fn default_main_sheet() -> String {
    "NCMs-CGIM-DINTE".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            user_agent: default_user_agent(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            trade_ttl_secs: default_trade_ttl_secs(),
            description_ttl_secs: default_description_ttl_secs(),
            update_ttl_secs: default_update_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn trade_ttl(&self) -> Duration {
        Duration::from_secs(self.trade_ttl_secs)
    }
    pub fn description_ttl(&self) -> Duration {
        Duration::from_secs(self.description_ttl_secs)
    }
    pub fn update_ttl(&self) -> Duration {
        Duration::from_secs(self.update_ttl_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_from_year: default_history_from_year(),
            concurrency: default_concurrency(),
            price_unit: PriceUnit::default(),
            rolling_window_months: default_rolling_window_months(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            main_sheet: default_main_sheet(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("NCM").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            warn!("Invalid configuration ({}), falling back to defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }
}
