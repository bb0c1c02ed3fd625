use config::builder::{ConfigBuilder, DefaultState};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub run_migrations: bool,
    /// Currency given to settlement configs created on first request
    pub default_currency: String,
    /// Merchants swept in parallel per driver cycle
    pub driver_concurrency: usize,
    /// Attempts per store call when the error is transient (1 = no retry)
    pub driver_max_attempts: u32,
    /// Base pause between attempts; grows linearly per attempt
    pub driver_retry_backoff_ms: u64,
    /// Reject malformed settlement_time instead of falling back to 09:00:00
    pub strict_settlement_time: bool,
}

impl AppConfig {
    /// Defaults overlaid by environment variables (`DATABASE_URL`, `DRIVER_CONCURRENCY`, ...)
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::builder()?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/merchant_ledger")?
            .set_default("max_connections", 20)?
            .set_default("min_connections", 2)?
            .set_default("acquire_timeout_secs", 30)?
            .set_default("run_migrations", true)?
            .set_default("default_currency", "NGN")?
            .set_default("driver_concurrency", 8)?
            .set_default("driver_max_attempts", 3)?
            .set_default("driver_retry_backoff_ms", 500)?
            .set_default("strict_settlement_time", false)
    }
}
