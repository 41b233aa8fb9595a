//! epnumgen - fills in missing season/episode numbers in MediaPortal's EPG
//!
//! One linear batch pass: back up the database, evict stale cache
//! entries, then walk every candidate EPG row and resolve its numbers
//! from the description text or TheTVDB.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epnumgen::config::Config;
use epnumgen::db::Database;
use epnumgen::services::{BackupService, FileCache, HttpTransport, ScanService, TvdbClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "epnumgen=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting EPG episode number scan");

    let db = Database::connect(&config.database_url, &config.making_of_suffix).await?;
    tracing::info!("Database connected");

    // A failed backup is logged but never blocks the scan
    let backup = BackupService::new(&config);
    match backup.dump().await {
        Ok(path) => tracing::info!(path = %path.display(), "Database backup taken"),
        Err(e) => tracing::error!(error = %e, "Could not take database backup"),
    }

    let cache = Arc::new(FileCache::new(&config.cache_path));
    let transport = Arc::new(HttpTransport::new());
    let client = TvdbClient::new(transport, cache, &config);

    let mut scanner = ScanService::new(&db, client, &config);
    let stats = scanner.run().await?;

    tracing::info!(
        scanned = stats.scanned,
        offline = stats.resolved_offline,
        online = stats.resolved_online,
        unresolved = stats.unresolved,
        "Done"
    );
    Ok(())
}
