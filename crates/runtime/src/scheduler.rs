//! Periodic automatic backups.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::SnapshotManager;

/// Handle to the running backup timer.  Dropping it without calling
/// [`BackupScheduler::shutdown`] leaves the task running until the runtime
/// stops.
pub struct BackupScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackupScheduler {
    /// Start the timer.  The first backup happens one full `interval` after
    /// spawning; failures are logged and the timer keeps going.
    pub fn spawn(manager: Arc<SnapshotManager>, interval: Duration) -> Self {
        let (shutdown_tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "automatic backup timer started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match manager.create_automatic_backup().await {
                            Ok(id) => debug!(%id, "automatic backup complete"),
                            Err(err) => warn!(%err, "automatic backup failed"),
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("automatic backup timer stopped");
        });
        Self { shutdown_tx, handle }
    }

    /// Stop the timer and wait for it.  A backup already in progress runs to
    /// completion first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.handle.await {
            warn!(%err, "automatic backup task ended abnormally");
        }
    }
}
