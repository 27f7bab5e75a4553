use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::StateError;
use crate::events::StatusEvent;
use crate::snapshot::{IntegrityReport, SnapshotInfo};

use super::{SnapshotManager, read_snapshot};

/// Artifacts modified more recently than this may still be mid-write.
const FRESH_WRITE_WINDOW: Duration = Duration::from_secs(1);
/// Smallest size a real snapshot can plausibly have.
const MIN_PLAUSIBLE_BYTES: u64 = 128;

impl SnapshotManager {
    /// Check an artifact (default: the canonical state file) without applying
    /// it.  Validity needs the file to exist, decode, and pass the checksum.
    pub async fn validate_state_integrity(&self, path: Option<&Path>) -> IntegrityReport {
        let path = path.unwrap_or(self.canonical_path.as_path()).to_path_buf();
        let mut report = IntegrityReport {
            path: path.clone(),
            valid: false,
            warnings: Vec::new(),
            error: None,
        };

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) => {
                report.error = Some(StateError::io(&path, err).to_string());
                return report;
            }
        };
        match meta.modified().map(|m| m.elapsed()) {
            Ok(Ok(age)) if age >= FRESH_WRITE_WINDOW => {}
            Ok(_) => report
                .warnings
                .push("modified less than a second ago; a write may still be in progress".to_string()),
            Err(err) => debug!(%err, "modification time unavailable"),
        }
        if meta.len() < MIN_PLAUSIBLE_BYTES {
            report.warnings.push(format!(
                "only {} bytes; smaller than any complete snapshot",
                meta.len()
            ));
        }

        match read_snapshot(&path).await {
            Ok(_) => report.valid = true,
            Err(err) => report.error = Some(err.to_string()),
        }
        if !report.warnings.is_empty() {
            debug!(path = %path.display(), warnings = ?report.warnings, "state integrity warnings");
        }
        report
    }

    /// Restore the newest checkpoint that validates and applies cleanly,
    /// falling back to backups.  Individual failures only move the scan on;
    /// running out of candidates is an error surfaced to the operator.
    pub async fn recover_to_last_known_good_state(&self) -> Result<SnapshotInfo, StateError> {
        let checkpoints = self.list_checkpoints().await?;
        let checkpoint_count = checkpoints.len();
        if let Some(info) = self.first_restorable(checkpoints).await {
            return Ok(info);
        }

        let backups = self.list_backups().await?;
        let backup_count = backups.len();
        if let Some(info) = self.first_restorable(backups).await {
            return Ok(info);
        }

        error!(
            checkpoints = checkpoint_count,
            backups = backup_count,
            "recovery exhausted: no checkpoint or backup could be restored"
        );
        self.emit(StatusEvent::RecoveryExhausted {
            checkpoints: checkpoint_count,
            backups: backup_count,
        });
        Err(StateError::RecoveryExhausted {
            checkpoints: checkpoint_count,
            backups: backup_count,
        })
    }

    async fn first_restorable(&self, candidates: Vec<SnapshotInfo>) -> Option<SnapshotInfo> {
        for candidate in candidates {
            let report = self.validate_state_integrity(Some(candidate.path.as_path())).await;
            if !report.valid {
                warn!(id = %candidate.id, error = ?report.error, "recovery candidate failed validation");
                continue;
            }
            match self.restore_artifact(&candidate.path).await {
                Ok(_) => {
                    info!(id = %candidate.id, kind = ?candidate.kind, "recovered to last known good state");
                    return Some(candidate);
                }
                Err(err) => warn!(id = %candidate.id, %err, "recovery candidate failed to restore"),
            }
        }
        None
    }
}
