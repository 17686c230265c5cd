//! DealerBooks Reconciler Binary
//!
//! Keeps the exchange rate fresh and serves the reconciliation hook for the
//! dealership back office.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dealerbooks_fx::HttpRateSource;
use dealerbooks_ledger::{connect, run_migrations, PgBalanceStore, PgVehicleDirectory};
use dealerbooks_reconciler::{ReconcilerService, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting DealerBooks reconciler");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let pool = connect(&config.database_url, config.max_connections).await?;
    run_migrations(&pool).await?;

    let source = Arc::new(HttpRateSource::new(config.http_source_config())?);
    let service = ReconcilerService::new(
        config.clone(),
        source,
        Arc::new(PgBalanceStore::new(pool.clone())),
        Arc::new(PgVehicleDirectory::new(pool.clone())),
    );

    service.start().await?;

    info!(
        source_url = %config.rate_config.source_url,
        refresh_secs = config.rate_config.refresh_interval.as_secs(),
        "Reconciler running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service.stop().await?;
    pool.close().await;

    info!("Reconciler shutdown complete");
    Ok(())
}
