//! # Index Pilot
//!
//! Autonomous index advisor and manager for PostgreSQL-class databases.
//! Observes query traffic, decides which secondary indexes to create,
//! monitor, and retire, and gates every DDL behind a safeguard stack.
//!
//! ## Usage
//!
//! ```bash
//! # Start against a local database
//! PILOT_DB_HOST=localhost PILOT_DB_PASSWORD=secret index-pilot
//!
//! # Advisory mode is the default; apply mode issues DDL
//! PILOT_INDEXER_MODE=apply index-pilot
//! ```

use pilot_config::load_from_env;
use pilot_engine::Pilot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Application entry point
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting Index Pilot"
    );

    if let Err(e) = run().await {
        error!(error = %e, "engine failed");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run() -> anyhow::Result<()> {
    let config = load_from_env();
    info!(
        host = %config.database.host,
        database = %config.database.database,
        mode = config.indexer.mode.as_str(),
        "configuration loaded"
    );

    let pilot = Pilot::new(config).await?;
    pilot.start();

    // Keep the catalog aligned with the live schema at startup.
    match pilot.sync_schema().await {
        Ok(changes) => info!(changes = changes, "initial schema sync complete"),
        Err(e) => error!(error = %e, "initial schema sync failed"),
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    pilot.shutdown().await;
    Ok(())
}
