use std::path::Path;

use anyhow::{Result, bail};

use synaptic_runtime::{SleepStatus, SnapshotInfo, SnapshotManager};

pub(crate) async fn run_sleep(manager: &SnapshotManager) -> Result<()> {
    let status = manager.sleep().await?;
    println!(
        "sleeping; state saved to {}",
        status.canonical_save_location.display()
    );
    Ok(())
}

pub(crate) async fn run_wake(manager: &SnapshotManager) -> Result<()> {
    manager.wake().await?;
    println!("awake");
    Ok(())
}

pub(crate) async fn run_status(manager: &SnapshotManager, auto_sleep: Option<bool>) -> Result<()> {
    let status = match auto_sleep {
        Some(enabled) => manager.set_auto_sleep(enabled).await?,
        None => manager.status().await,
    };
    print_status(&status);
    Ok(())
}

pub(crate) async fn run_checkpoint_create(manager: &SnapshotManager, name: Option<&str>) -> Result<()> {
    let id = manager.create_checkpoint(name).await?;
    println!("checkpoint {id} created");
    Ok(())
}

pub(crate) async fn run_checkpoint_list(manager: &SnapshotManager) -> Result<()> {
    print_artifacts("checkpoints", &manager.list_checkpoints().await?);
    Ok(())
}

pub(crate) async fn run_checkpoint_restore(manager: &SnapshotManager, id: &str) -> Result<()> {
    let snapshot = manager.restore_from_checkpoint(id).await?;
    println!(
        "restored checkpoint {} (captured {})",
        snapshot.id,
        snapshot.created_at.to_rfc3339()
    );
    Ok(())
}

pub(crate) async fn run_checkpoint_cleanup(manager: &SnapshotManager, keep: usize) -> Result<()> {
    let removed = manager.cleanup_old_checkpoints(keep).await?;
    println!("removed {removed} checkpoints; kept at most {keep}");
    Ok(())
}

pub(crate) async fn run_backup_create(manager: &SnapshotManager, name: Option<&str>) -> Result<()> {
    let id = manager.create_manual_backup(name).await?;
    println!("backup {id} created");
    Ok(())
}

pub(crate) async fn run_backup_list(manager: &SnapshotManager) -> Result<()> {
    print_artifacts("backups", &manager.list_backups().await?);
    Ok(())
}

pub(crate) async fn run_backup_restore(manager: &SnapshotManager, id: &str) -> Result<()> {
    let snapshot = manager.restore_from_backup(id).await?;
    println!(
        "restored backup {} (captured {})",
        snapshot.id,
        snapshot.created_at.to_rfc3339()
    );
    Ok(())
}

pub(crate) async fn run_validate(manager: &SnapshotManager, path: Option<&Path>) -> Result<()> {
    let report = manager.validate_state_integrity(path).await;
    println!("{}: {}", report.path.display(), if report.valid { "valid" } else { "INVALID" });
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    if let Some(error) = &report.error {
        println!("  error: {error}");
    }
    if !report.valid {
        bail!("state artifact failed validation");
    }
    Ok(())
}

pub(crate) async fn run_recover(manager: &SnapshotManager) -> Result<()> {
    let recovered = manager.recover_to_last_known_good_state().await?;
    println!(
        "recovered from {:?} {} (captured {})",
        recovered.kind,
        recovered.id,
        recovered.created_at.to_rfc3339()
    );
    Ok(())
}

fn print_status(status: &SleepStatus) {
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "(never)".to_string())
    };
    println!("── sleep status ─────────────────────────────────────");
    println!("  state          : {}", if status.is_sleeping { "sleeping" } else { "awake" });
    println!("  last sleep     : {}", fmt_time(status.last_sleep_time));
    println!("  last wake      : {}", fmt_time(status.last_wake_time));
    println!("  auto-sleep     : {}", if status.auto_sleep_enabled { "on" } else { "off" });
    println!("  canonical file : {}", status.canonical_save_location.display());
}

fn print_artifacts(label: &str, artifacts: &[SnapshotInfo]) {
    if artifacts.is_empty() {
        println!("no {label}");
        return;
    }
    for artifact in artifacts {
        println!(
            "{:<32}  {:<10}  {}  {:>8} bytes",
            artifact.id,
            format!("{:?}", artifact.kind),
            artifact.created_at.format("%Y-%m-%d %H:%M:%S"),
            artifact.size_bytes
        );
    }
    println!("({} {label})", artifacts.len());
}
