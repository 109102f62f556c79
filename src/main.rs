use anyhow::{Context, Result};
use backup_mirror::backup::scheduler::shutdown_signal;
use backup_mirror::backup::{IgnoreMatcher, Scheduler, SyncEngine};
use backup_mirror::storage::StateStore;
use backup_mirror::utils::{self, config};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Values in .env behave like real environment variables
    dotenvy::dotenv().ok();
    utils::logging::init_tracing();

    let config_path = config::resolve_config_path(std::env::args().nth(1));
    let config = utils::Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    info!("Starting backup mirror v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "{} task(s), interval {} ms, dry run: {}, hashing: {}",
        config.tasks.len(),
        config.interval_millis,
        config.dry_run,
        config.use_hash_comparison
    );

    let ignore = IgnoreMatcher::new(&config.ignored_directory_names, &config.ignore_patterns)
        .context("Invalid ignore configuration")?;
    let engine = SyncEngine::new(
        config.sync_options(),
        ignore,
        StateStore::new(&config.state_path),
    );
    let scheduler = Scheduler::new(Arc::new(engine), config.tasks.clone(), config.interval());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;

    info!("Backup mirror stopped");
    Ok(())
}
