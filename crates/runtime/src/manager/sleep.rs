use tracing::{debug, info};

use crate::error::StateError;
use crate::events::StatusEvent;
use crate::integrity;
use crate::snapshot::{SleepStatus, SnapshotKind, StateSnapshot};

use super::{SnapshotManager, read_snapshot, write_snapshot};

const CURRENT_STATE_ID: &str = "current_state";

impl SnapshotManager {
    /// Persist the full state to the canonical file and enter Sleeping.
    ///
    /// The status flips only after the file is durably written; a failed
    /// write leaves the manager awake.  Sleeping again is a no-op.
    pub async fn sleep(&self) -> Result<SleepStatus, StateError> {
        let _transition = self.transition.lock().await;
        let current = self.status().await;
        if current.is_sleeping {
            debug!("sleep requested while already sleeping");
            return Ok(current);
        }

        let now = self.clock.now();
        let mut prospective = current;
        prospective.is_sleeping = true;
        prospective.last_sleep_time = Some(now);

        let written = async {
            let snapshot = self
                .capture(CURRENT_STATE_ID, SnapshotKind::Current, prospective, now)
                .await?;
            write_snapshot(&self.canonical_path, &snapshot).await
        }
        .await;
        let bytes = self.reported("sleep", written)?;

        let updated = {
            let mut status = self.status.lock().await;
            status.is_sleeping = true;
            status.last_sleep_time = Some(now);
            status.clone()
        };
        info!(path = %self.canonical_path.display(), bytes, "entered sleep");
        self.emit(StatusEvent::SleepStatusChanged(updated.clone()));
        Ok(updated)
    }

    /// Reload the canonical state file and return to Awake.  Waking while
    /// awake is a no-op; a missing canonical file is an error.
    ///
    /// The awake status is written back to the canonical file before the
    /// live status flips, so a restart after a wake comes back awake.
    pub async fn wake(&self) -> Result<SleepStatus, StateError> {
        let _transition = self.transition.lock().await;
        let current = self.status().await;
        if !current.is_sleeping {
            debug!("wake requested while already awake");
            return Ok(current);
        }

        let now = self.clock.now();
        let mut prospective = current;
        prospective.is_sleeping = false;
        prospective.last_wake_time = Some(now);

        let restored: Result<(), StateError> = async {
            let snapshot = read_snapshot(&self.canonical_path).await.map_err(|err| {
                if err.is_not_found() {
                    StateError::NotFound(self.canonical_path.display().to_string())
                } else {
                    err
                }
            })?;
            self.apply(&snapshot).await?;
            self.restamp_canonical(snapshot, prospective).await
        }
        .await;
        self.reported("wake", restored)?;

        let updated = {
            let mut status = self.status.lock().await;
            status.is_sleeping = false;
            status.last_wake_time = Some(now);
            status.clone()
        };
        info!("woke from sleep");
        self.emit(StatusEvent::SleepStatusChanged(updated.clone()));
        Ok(updated)
    }

    /// Enable or disable auto-sleep and record the choice in the canonical
    /// state file.  With no canonical file yet, one is captured from the
    /// live collaborators; a corrupted one is left alone and the toggle fails.
    pub async fn set_auto_sleep(&self, enabled: bool) -> Result<SleepStatus, StateError> {
        let _transition = self.transition.lock().await;
        let mut prospective = self.status().await;
        prospective.auto_sleep_enabled = enabled;

        let persisted: Result<(), StateError> = async {
            match read_snapshot(&self.canonical_path).await {
                Ok(snapshot) => self.restamp_canonical(snapshot, prospective).await,
                Err(err) if err.is_not_found() => {
                    let snapshot = self
                        .capture(CURRENT_STATE_ID, SnapshotKind::Current, prospective, self.clock.now())
                        .await?;
                    write_snapshot(&self.canonical_path, &snapshot).await.map(drop)
                }
                Err(err) => Err(err),
            }
        }
        .await;
        self.reported("set_auto_sleep", persisted)?;

        let updated = {
            let mut status = self.status.lock().await;
            status.auto_sleep_enabled = enabled;
            status.clone()
        };
        debug!(enabled, "auto-sleep toggled");
        self.emit(StatusEvent::SleepStatusChanged(updated.clone()));
        Ok(updated)
    }

    /// Rewrite the canonical file with `status`, keeping the captured state.
    async fn restamp_canonical(
        &self,
        mut snapshot: StateSnapshot,
        status: SleepStatus,
    ) -> Result<(), StateError> {
        snapshot.sleep_status = status;
        snapshot.checksum = None;
        let snapshot = integrity::stamp(snapshot)?;
        write_snapshot(&self.canonical_path, &snapshot).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::super::test_support::{at, harness};
    use super::*;

    #[tokio::test]
    async fn sleep_writes_stamped_canonical_file() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;

        let status = h.manager.sleep().await.unwrap();
        assert!(status.is_sleeping);
        assert_eq!(status.last_sleep_time, Some(at(1_700_000_000)));

        let bytes = std::fs::read(h.manager.canonical_path()).unwrap();
        let snapshot = integrity::verify_encoded(&bytes).unwrap();
        assert_eq!(snapshot.kind, SnapshotKind::Current);
        assert!(snapshot.checksum.is_some());
        assert!(snapshot.sleep_status.is_sleeping);
        assert_eq!(snapshot.memory_usage.long_term_records, 3);
        assert_eq!(snapshot.neural_state.unwrap().data, b"synapse weights");
    }

    #[tokio::test]
    async fn repeated_sleep_keeps_first_timestamp() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        h.manager.sleep().await.unwrap();
        h.clock.advance(chrono::Duration::minutes(5));

        let again = h.manager.sleep().await.unwrap();
        assert!(again.is_sleeping);
        assert_eq!(again.last_sleep_time, Some(at(1_700_000_000)));
    }

    #[tokio::test]
    async fn wake_while_awake_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        let status = h.manager.wake().await.unwrap();
        assert!(!status.is_sleeping);
        assert_eq!(status.last_wake_time, None);
        assert!(h.memory.restored_ids().await.is_empty());
    }

    #[tokio::test]
    async fn wake_restores_memory_and_neural_state() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        let mut events = h.manager.subscribe();
        h.manager.sleep().await.unwrap();
        h.clock.advance(chrono::Duration::hours(8));

        let status = h.manager.wake().await.unwrap();
        assert!(!status.is_sleeping);
        assert_eq!(status.last_wake_time, Some(at(1_700_000_000 + 8 * 3600)));
        assert_eq!(status.last_sleep_time, Some(at(1_700_000_000)));
        assert_eq!(h.memory.restored_ids().await, ["current_state"]);
        assert_eq!(h.neural.loaded.lock().await.len(), 1);

        assert!(matches!(
            events.recv().await.unwrap(),
            StatusEvent::SleepStatusChanged(s) if s.is_sleeping
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            StatusEvent::SleepStatusChanged(s) if !s.is_sleeping
        ));
    }

    #[tokio::test]
    async fn wake_without_canonical_file_fails_and_stays_asleep() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        h.manager.sleep().await.unwrap();
        std::fs::remove_file(h.manager.canonical_path()).unwrap();

        let err = h.manager.wake().await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
        assert!(h.manager.status().await.is_sleeping);
    }

    #[tokio::test]
    async fn wake_refuses_corrupted_canonical_file() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        h.manager.sleep().await.unwrap();
        super::super::test_support::flip_middle_byte(h.manager.canonical_path());

        assert!(h.manager.wake().await.unwrap_err().is_corrupted());
        assert!(h.manager.status().await.is_sleeping);
        assert!(h.memory.restored_ids().await.is_empty());
    }

    #[tokio::test]
    async fn failed_write_aborts_sleep() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        let mut events = h.manager.subscribe();
        // A directory squatting on the canonical path makes the rename fail.
        std::fs::create_dir_all(h.manager.canonical_path().join("blocker")).unwrap();

        assert!(h.manager.sleep().await.is_err());
        let status = h.manager.status().await;
        assert!(!status.is_sleeping);
        assert_eq!(status.last_sleep_time, None);
        assert!(matches!(events.recv().await.unwrap(), StatusEvent::Error { operation, .. } if operation == "sleep"));
    }

    #[tokio::test]
    async fn sleeping_status_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let h = harness(dir.path()).await;
            h.manager.sleep().await.unwrap();
        }
        let h = harness(dir.path()).await;
        let status = h.manager.status().await;
        assert!(status.is_sleeping);
        assert_eq!(status.last_sleep_time, Some(at(1_700_000_000)));

        h.manager.wake().await.unwrap();
        assert_eq!(h.memory.restored_ids().await, ["current_state"]);
    }

    #[tokio::test]
    async fn awake_status_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let h = harness(dir.path()).await;
            h.manager.sleep().await.unwrap();
            h.clock.advance(chrono::Duration::hours(8));
            h.manager.wake().await.unwrap();
        }
        let bytes = std::fs::read(dir.path().join("current_state.json")).unwrap();
        let snapshot = integrity::verify_encoded(&bytes).unwrap();
        assert!(!snapshot.sleep_status.is_sleeping);
        assert_eq!(snapshot.neural_state.unwrap().data, b"synapse weights");

        let h = harness(dir.path()).await;
        let status = h.manager.status().await;
        assert!(!status.is_sleeping);
        assert_eq!(status.last_sleep_time, Some(at(1_700_000_000)));
        assert_eq!(status.last_wake_time, Some(at(1_700_000_000 + 8 * 3600)));

        // Already awake, so nothing is re-applied.
        h.manager.wake().await.unwrap();
        assert!(h.memory.restored_ids().await.is_empty());
    }

    #[tokio::test]
    async fn corrupted_canonical_file_is_not_rewritten_on_wake() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        h.manager.sleep().await.unwrap();
        super::super::test_support::flip_middle_byte(h.manager.canonical_path());
        let damaged = std::fs::read(h.manager.canonical_path()).unwrap();

        assert!(h.manager.wake().await.is_err());
        assert_eq!(std::fs::read(h.manager.canonical_path()).unwrap(), damaged);
    }

    #[tokio::test]
    async fn auto_sleep_toggle_is_reflected_in_status() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        assert!(h.manager.status().await.auto_sleep_enabled);
        assert!(!h.manager.set_auto_sleep(false).await.unwrap().auto_sleep_enabled);
        assert!(!h.manager.status().await.auto_sleep_enabled);
    }

    #[tokio::test]
    async fn auto_sleep_toggle_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let h = harness(dir.path()).await;
            h.manager.set_auto_sleep(false).await.unwrap();
        }
        let h = harness(dir.path()).await;
        let status = h.manager.status().await;
        assert!(!status.auto_sleep_enabled);
        assert!(!status.is_sleeping);

        // Toggling while asleep keeps the sleeping snapshot wakeable.
        h.manager.sleep().await.unwrap();
        h.manager.set_auto_sleep(true).await.unwrap();
        drop(h);
        let h = harness(dir.path()).await;
        let status = h.manager.status().await;
        assert!(status.auto_sleep_enabled);
        assert!(status.is_sleeping);
        h.manager.wake().await.unwrap();
        assert_eq!(h.memory.restored_ids().await, ["current_state"]);
    }

    #[tokio::test]
    async fn auto_sleep_toggle_refuses_corrupted_canonical_file() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path()).await;
        h.manager.sleep().await.unwrap();
        super::super::test_support::flip_middle_byte(h.manager.canonical_path());

        assert!(h.manager.set_auto_sleep(false).await.unwrap_err().is_corrupted());
        assert!(h.manager.status().await.auto_sleep_enabled);
    }
}
