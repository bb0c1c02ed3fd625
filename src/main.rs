use merchant_ledger::{bootstrap, config::AppConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(
            |_| "info,sqlx=warn,merchant_ledger=debug,settlement_worker=debug".into(),
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting merchant settlement worker");

    let config = AppConfig::from_env()?;
    let state = bootstrap::initialize_app_state(&config).await?;

    let sweeper = state.driver.clone().start();
    info!("🌐 Settlement worker started");

    tokio::select! {
        result = sweeper => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping settlement worker");
        }
    }

    Ok(())
}
