//! The Syncer tick loop: build the store and host clients once, then call
//! [`mirror_core::syncer::run_once`] forever, sleeping the remainder of each
//! interval between ticks (§4.1).

use std::time::{Duration, Instant};

use mirror_core::{Config, Result};
use mirror_git::GitCliWorkspace;
use mirror_store::SqliteStore;
use tracing::{info, warn};

use crate::bootstrap;

/// Run the Syncer forever. Returns only if store setup or client bootstrap
/// fails; a failing tick itself is logged and retried on the next interval.
///
/// # Errors
/// Returns an error if the database can't be opened or installation
/// discovery fails.
pub async fn run(config: Config) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    let workspace = GitCliWorkspace::new();
    let auth = bootstrap::load_app_auth(&config)?;

    let interval = Duration::from_secs(config.sync_interval);
    loop {
        let clients = match bootstrap::build_clients(&config, &auth).await {
            Ok(clients) => clients,
            Err(e) => {
                warn!(error = %e, "failed to refresh installation clients, retrying next tick");
                tokio::time::sleep(interval).await;
                continue;
            }
        };

        let started = Instant::now();
        let summary = mirror_core::syncer::run_once(&store, &clients, &workspace, &config).await;
        info!(
            tuples = summary.tuples,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis(),
            "sync tick complete"
        );

        let elapsed = started.elapsed();
        let sleep_for = interval.saturating_sub(elapsed);
        tokio::time::sleep(sleep_for).await;
    }
}
