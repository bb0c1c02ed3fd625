use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    error::AppResult,
    ledger::{repository::PgBalanceStore, BalanceLedger},
    settlement::{
        driver::SettlementDriver,
        repository::PgSettlementConfigStore,
        scheduler::{SchedulerSettings, SettlementScheduler},
    },
};

/// Wired-up services sharing one connection pool
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<BalanceLedger>,
    pub scheduler: Arc<SettlementScheduler>,
    pub driver: Arc<SettlementDriver>,
}

pub async fn initialize_app_state(config: &AppConfig) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(config).await?;

    let ledger = Arc::new(BalanceLedger::new(Arc::new(PgBalanceStore::new(pool.clone()))));
    info!("✅ Balance ledger initialized");

    let scheduler = Arc::new(SettlementScheduler::new(
        Arc::new(PgSettlementConfigStore::new(pool)),
        SchedulerSettings {
            default_currency: config.default_currency.clone(),
            strict_settlement_time: config.strict_settlement_time,
        },
    ));
    info!(
        strict_settlement_time = config.strict_settlement_time,
        "✅ Settlement scheduler initialized"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let driver = Arc::new(
        SettlementDriver::new(ledger.clone(), scheduler.clone(), clock, config.driver_concurrency)
            .with_retry(
                config.driver_max_attempts,
                Duration::from_millis(config.driver_retry_backoff_ms),
            ),
    );
    info!(
        concurrency = config.driver_concurrency,
        max_attempts = config.driver_max_attempts,
        "✅ Settlement driver initialized"
    );

    Ok(AppState {
        ledger,
        scheduler,
        driver,
    })
}

async fn initialize_database(config: &AppConfig) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", config.max_connections);

    if config.run_migrations {
        info!("🔄 Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    info!("✓ Database initialized");
    Ok(pool)
}
