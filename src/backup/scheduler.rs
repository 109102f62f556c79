use super::{BackupTask, SyncEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Runs the engine once immediately, then every `interval` until shut down.
///
/// Shutdown is only observed between runs; a run in progress always
/// finishes, including its state save.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    tasks: Vec<BackupTask>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, tasks: Vec<BackupTask>, interval: Duration) -> Self {
        Self {
            engine,
            tasks,
            interval,
        }
    }

    /// Returns the number of completed runs
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut runs = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.engine.run(&self.tasks).await {
                Ok(summary) => {
                    info!("{}", summary);
                    if summary.has_errors() {
                        warn!("Run finished with {} error(s)", summary.errors);
                    }
                }
                Err(e) => error!("Run aborted: {}", e),
            }
            runs += 1;

            if self.interval.is_zero() {
                break;
            }

            info!(
                "Next run in {}",
                humantime::format_duration(self.interval)
            );
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    // A dropped sender also means stop
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped after {} run(s)", runs);
        runs
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
