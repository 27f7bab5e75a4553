use tracing::info;

use crate::error::StateError;
use crate::events::StatusEvent;
use crate::snapshot::{SnapshotInfo, SnapshotKind, StateSnapshot};

use super::{SnapshotManager, list_artifacts, remove_artifact, validate_artifact_id, write_snapshot};

impl SnapshotManager {
    /// Write a stamped checkpoint and flush the memory subsystem.
    ///
    /// The id defaults to `checkpoint_<unixSeconds>`.  An existing checkpoint
    /// with the same id is replaced.
    pub async fn create_checkpoint(&self, name: Option<&str>) -> Result<String, StateError> {
        let result: Result<String, StateError> = async {
            let now = self.clock.now();
            let id = match name.map(str::trim) {
                Some(name) => name.to_string(),
                None => format!("checkpoint_{}", now.timestamp()),
            };
            validate_artifact_id(&id)?;

            let status = self.status().await;
            let snapshot = self.capture(&id, SnapshotKind::Checkpoint, status, now).await?;
            let path = Self::artifact_path(&self.checkpoint_dir, &id);
            let bytes = write_snapshot(&path, &snapshot).await?;
            self.memory.save_state().await.map_err(StateError::Memory)?;

            info!(%id, bytes, "checkpoint created");
            self.emit(StatusEvent::CheckpointCreated {
                id: id.clone(),
                path,
            });
            Ok(id)
        }
        .await;
        self.reported("create_checkpoint", result)
    }

    /// Verify the checkpoint and restore from it.  A checksum mismatch is
    /// reported as corruption before any collaborator is touched.
    pub async fn restore_from_checkpoint(&self, id: &str) -> Result<StateSnapshot, StateError> {
        let result: Result<StateSnapshot, StateError> = async {
            validate_artifact_id(id)?;
            let path = Self::artifact_path(&self.checkpoint_dir, id);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(StateError::NotFound(format!("checkpoint `{id}`")));
            }
            self.restore_artifact(&path).await
        }
        .await;
        self.reported("restore_from_checkpoint", result)
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<SnapshotInfo>, StateError> {
        list_artifacts(&self.checkpoint_dir).await
    }

    /// Keep the `max` newest checkpoints.  Returns how many were deleted.
    pub async fn cleanup_old_checkpoints(&self, max: usize) -> Result<usize, StateError> {
        let result: Result<usize, StateError> = async {
            let stale = self
                .list_checkpoints()
                .await?
                .into_iter()
                .skip(max)
                .collect::<Vec<_>>();
            for info in &stale {
                remove_artifact(&info.path).await?;
            }
            if !stale.is_empty() {
                info!(removed = stale.len(), kept = max, "old checkpoints removed");
            }
            Ok(stale.len())
        }
        .await;
        self.reported("cleanup_old_checkpoints", result)
    }
}
