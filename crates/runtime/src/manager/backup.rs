use tracing::{debug, info};

use crate::error::StateError;
use crate::events::StatusEvent;
use crate::snapshot::{SnapshotInfo, SnapshotKind, StateSnapshot};

use super::{SnapshotManager, list_artifacts, remove_artifact, validate_artifact_id, write_snapshot};

impl SnapshotManager {
    /// Timer-driven backup `auto_backup_<unixSeconds>`.  Afterwards only the
    /// newest `max_automatic_backups` automatic backups are kept; manual
    /// backups are never pruned.
    pub async fn create_automatic_backup(&self) -> Result<String, StateError> {
        let result: Result<String, StateError> = async {
            let now = self.clock.now();
            let id = format!("auto_backup_{}", now.timestamp());
            self.write_backup(&id, SnapshotKind::Automatic).await?;
            let pruned = self.prune_automatic_backups().await?;
            if pruned > 0 {
                debug!(pruned, keep = self.max_automatic_backups, "old automatic backups pruned");
            }
            Ok(id)
        }
        .await;
        self.reported("create_automatic_backup", result)
    }

    /// Operator-requested backup; the id defaults to `backup_<unixSeconds>`.
    pub async fn create_manual_backup(&self, name: Option<&str>) -> Result<String, StateError> {
        let result: Result<String, StateError> = async {
            let id = match name.map(str::trim) {
                Some(name) => name.to_string(),
                None => format!("backup_{}", self.clock.now().timestamp()),
            };
            validate_artifact_id(&id)?;
            self.write_backup(&id, SnapshotKind::Manual).await?;
            Ok(id)
        }
        .await;
        self.reported("create_manual_backup", result)
    }

    pub async fn list_backups(&self) -> Result<Vec<SnapshotInfo>, StateError> {
        list_artifacts(&self.backup_dir).await
    }

    pub async fn restore_from_backup(&self, id: &str) -> Result<StateSnapshot, StateError> {
        let result: Result<StateSnapshot, StateError> = async {
            validate_artifact_id(id)?;
            let path = Self::artifact_path(&self.backup_dir, id);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(StateError::NotFound(format!("backup `{id}`")));
            }
            self.restore_artifact(&path).await
        }
        .await;
        self.reported("restore_from_backup", result)
    }

    async fn write_backup(&self, id: &str, kind: SnapshotKind) -> Result<(), StateError> {
        let now = self.clock.now();
        let status = self.status().await;
        let snapshot = self.capture(id, kind, status, now).await?;
        let path = Self::artifact_path(&self.backup_dir, id);
        let bytes = write_snapshot(&path, &snapshot).await?;

        info!(%id, ?kind, bytes, "backup written");
        self.emit(StatusEvent::BackupCreated {
            id: id.to_string(),
            kind,
            path,
        });
        Ok(())
    }

    async fn prune_automatic_backups(&self) -> Result<usize, StateError> {
        let stale = self
            .list_backups()
            .await?
            .into_iter()
            .filter(|info| info.kind == SnapshotKind::Automatic)
            .skip(self.max_automatic_backups)
            .collect::<Vec<_>>();
        for info in &stale {
            remove_artifact(&info.path).await?;
        }
        Ok(stale.len())
    }
}
