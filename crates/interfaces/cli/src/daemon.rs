use std::fs::{self, File};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use tokio::sync::broadcast;
use tracing::{info, warn};

use synaptic_config::AppConfig;
use synaptic_memory::CompressedRecordStore;
use synaptic_runtime::{BackupScheduler, SnapshotManager, StatusEvent};

/// Run the automatic backup timer in the foreground until SIGINT/SIGTERM.
///
/// Only one daemon may own a state directory; the exclusive lock on
/// `<state>/daemon.lock` is released when the process exits.
pub(crate) async fn run_daemon(
    config: &AppConfig,
    store: Arc<CompressedRecordStore>,
    manager: Arc<SnapshotManager>,
) -> Result<()> {
    fs::create_dir_all(&config.state.directory)?;
    let lock_path = config.state.directory.join("daemon.lock");
    let lock_file = File::create(&lock_path)
        .with_context(|| format!("failed to create {}", lock_path.display()))?;
    lock_file.try_lock_exclusive().map_err(|_| {
        anyhow!(
            "another daemon already holds the lock at {}",
            lock_path.display()
        )
    })?;

    let mut events = manager.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StatusEvent::BackupCreated { id, path, .. }) => {
                    info!(%id, path = %path.display(), "backup written");
                }
                Ok(StatusEvent::RecoveryExhausted { checkpoints, backups }) => {
                    warn!(checkpoints, backups, "recovery exhausted");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "daemon event reporter lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let scheduler = match config.state.backup_interval_secs {
        0 => {
            info!("backup_interval_secs = 0; automatic backups disabled");
            None
        }
        secs => Some(BackupScheduler::spawn(
            manager.clone(),
            Duration::from_secs(secs),
        )),
    };

    println!("daemon running (state: {})", config.state.directory.display());
    wait_for_termination().await?;
    info!("shutdown requested");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }

    if let Err(err) = store.persist_index().await {
        warn!(%err, "final index save failed");
    }
    match manager.create_automatic_backup().await {
        Ok(id) => info!(%id, "final backup written"),
        Err(err) => warn!(%err, "final backup failed"),
    }

    reporter.abort();
    drop(lock_file);
    let _ = fs::remove_file(&lock_path);
    println!("daemon stopped");
    Ok(())
}

async fn wait_for_termination() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
