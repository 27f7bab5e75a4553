//! Sleep/wake transitions, checkpoints, backups and recovery.
//!
//! The manager exclusively owns the state directory: the canonical
//! `current_state.json`, `Checkpoints/` and `Backups/`.  Every artifact is a
//! stamped [`StateSnapshot`] written with tmp + fsync + rename, so a reader
//! sees either the previous artifact or the complete new one.
//!
//! Two locks: `transition` serializes sleep, wake and the auto-sleep toggle
//! end to end (including the snapshot write), while `status` is only taken for single read-modify-write
//! steps.  The backup timer reads `status` and never waits on a transition.

mod backup;
mod checkpoint;
mod recovery;
mod sleep;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use synaptic_config::StateConfig;
use synaptic_memory::{Clock, write_atomic};

use crate::error::StateError;
use crate::events::StatusEvent;
use crate::integrity;
use crate::provider::{MemorySubsystem, NeuralStateProvider};
use crate::snapshot::{SleepStatus, SnapshotInfo, SnapshotKind, StateSnapshot};

const EVENT_CAPACITY: usize = 256;
const ARTIFACT_EXTENSION: &str = "json";

pub struct SnapshotManager {
    canonical_path: PathBuf,
    checkpoint_dir: PathBuf,
    backup_dir: PathBuf,
    max_automatic_backups: usize,
    memory: Arc<dyn MemorySubsystem>,
    neural: Arc<dyn NeuralStateProvider>,
    clock: Arc<dyn Clock>,
    status: Mutex<SleepStatus>,
    transition: Mutex<()>,
    events: broadcast::Sender<StatusEvent>,
}

impl SnapshotManager {
    /// Create the state directories and pick up the sleep status recorded in
    /// the canonical state file, if that file validates.
    pub async fn open(
        config: &StateConfig,
        memory: Arc<dyn MemorySubsystem>,
        neural: Arc<dyn NeuralStateProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StateError> {
        let checkpoint_dir = config.checkpoint_dir();
        let backup_dir = config.backup_dir();
        for dir in [&checkpoint_dir, &backup_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|err| StateError::io(dir, err))?;
        }

        let canonical_path = config.current_state_path();
        let mut status = SleepStatus::awake(&canonical_path, config.auto_sleep_enabled);
        match read_snapshot(&canonical_path).await {
            Ok(snapshot) => {
                status = snapshot.sleep_status;
                status.canonical_save_location = canonical_path.clone();
                debug!(sleeping = status.is_sleeping, "restored sleep status from canonical state file");
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(%err, "canonical state file unusable; starting awake"),
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        info!(
            state_dir = %config.directory.display(),
            sleeping = status.is_sleeping,
            "snapshot manager ready"
        );
        Ok(Self {
            canonical_path,
            checkpoint_dir,
            backup_dir,
            max_automatic_backups: config.max_automatic_backups,
            memory,
            neural,
            clock,
            status: Mutex::new(status),
            transition: Mutex::new(()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn canonical_path(&self) -> &Path {
        &self.canonical_path
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub async fn status(&self) -> SleepStatus {
        self.status.lock().await.clone()
    }

    // ── shared internals ───────────────────────────────────────────────────

    /// Build a stamped snapshot of the collaborators' current state.
    async fn capture(
        &self,
        id: &str,
        kind: SnapshotKind,
        sleep_status: SleepStatus,
        created_at: DateTime<Utc>,
    ) -> Result<StateSnapshot, StateError> {
        let neural_state = self.neural.current_state().await.map_err(StateError::Neural)?;
        let memory_usage = self.memory.usage_summary().await.map_err(StateError::Memory)?;
        let snapshot = StateSnapshot {
            id: id.to_string(),
            created_at,
            kind,
            neural_state,
            memory_usage,
            sleep_status,
            checksum: None,
        };
        Ok(integrity::stamp(snapshot)?)
    }

    /// Hand a verified snapshot to the collaborators.
    async fn apply(&self, snapshot: &StateSnapshot) -> Result<(), StateError> {
        self.memory
            .restore_state(snapshot)
            .await
            .map_err(StateError::Memory)?;
        if let Some(neural) = &snapshot.neural_state {
            self.neural.load_state(neural).await.map_err(StateError::Neural)?;
        }
        Ok(())
    }

    /// Verify and apply the artifact at `path`.
    async fn restore_artifact(&self, path: &Path) -> Result<StateSnapshot, StateError> {
        let snapshot = read_snapshot(path).await?;
        self.apply(&snapshot).await?;
        info!(id = %snapshot.id, kind = ?snapshot.kind, "state restored");
        self.emit(StatusEvent::Restored {
            id: snapshot.id.clone(),
            kind: snapshot.kind,
        });
        Ok(snapshot)
    }

    fn artifact_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.{ARTIFACT_EXTENSION}"))
    }

    /// Log and broadcast a failure, then hand the result back unchanged.
    fn reported<T>(&self, operation: &str, result: Result<T, StateError>) -> Result<T, StateError> {
        if let Err(err) = &result {
            warn!(operation, %err, "state operation failed");
            self.emit(StatusEvent::Error {
                operation: operation.to_string(),
                message: err.to_string(),
            });
        }
        result
    }

    fn emit(&self, event: StatusEvent) {
        let _ = self.events.send(event);
    }
}

/// Artifact ids become file names.
fn validate_artifact_id(id: &str) -> Result<(), StateError> {
    if id.is_empty() {
        return Err(StateError::Validation("snapshot id must not be empty".to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        || id.starts_with('.')
    {
        return Err(StateError::Validation(format!(
            "snapshot id `{id}` may only contain ASCII letters, digits, `_`, `-` and `.`"
        )));
    }
    Ok(())
}

/// Read and fully verify an artifact.
pub(crate) async fn read_snapshot(path: &Path) -> Result<StateSnapshot, StateError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| StateError::io(path, err))?;
    integrity::verify_encoded(&bytes).map_err(|err| StateError::corrupted(path, err))
}

async fn write_snapshot(path: &Path, snapshot: &StateSnapshot) -> Result<u64, StateError> {
    let bytes = integrity::encode(snapshot)?;
    write_atomic(path, &bytes)
        .await
        .map_err(|err| StateError::io(path, err))?;
    Ok(bytes.len() as u64)
}

/// Decodable artifacts in `dir`, newest first (ties: id descending).
/// Checksums are not checked here; restoration always re-verifies.
async fn list_artifacts(dir: &Path) -> Result<Vec<SnapshotInfo>, StateError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| StateError::io(dir, err))?;
    let mut listed = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| StateError::io(dir, err))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
            continue;
        }
        let Ok(bytes) = tokio::fs::read(&path).await else { continue };
        match serde_json::from_slice::<StateSnapshot>(&bytes) {
            Ok(snapshot) => listed.push(SnapshotInfo {
                id: snapshot.id,
                kind: snapshot.kind,
                created_at: snapshot.created_at,
                path,
                size_bytes: bytes.len() as u64,
            }),
            Err(err) => debug!(path = %path.display(), %err, "skipping unreadable state artifact"),
        }
    }
    listed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    Ok(listed)
}

async fn remove_artifact(path: &Path) -> Result<(), StateError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StateError::io(path, err)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::Mutex;

    use synaptic_config::StateConfig;
    use synaptic_memory::{ManualClock, MemoryRecord, SearchQuery};

    use super::SnapshotManager;
    use crate::provider::{MemorySubsystem, NeuralStateProvider};
    use crate::snapshot::{MemoryUsageSummary, NeuralState, StateSnapshot};

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    /// Memory subsystem double that records hook calls.
    #[derive(Default)]
    pub struct RecordingMemory {
        pub saves: AtomicUsize,
        pub restored: Mutex<Vec<String>>,
        pub fail_restore_for: Mutex<HashSet<String>>,
    }

    impl RecordingMemory {
        pub async fn restored_ids(&self) -> Vec<String> {
            self.restored.lock().await.clone()
        }

        pub fn save_count(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MemorySubsystem for RecordingMemory {
        async fn store_short_term(&self, record: MemoryRecord) -> anyhow::Result<MemoryRecord> {
            Ok(record)
        }

        async fn store_long_term(&self, record: MemoryRecord) -> anyhow::Result<MemoryRecord> {
            Ok(record)
        }

        async fn recall(&self, _query: &SearchQuery) -> anyhow::Result<Vec<MemoryRecord>> {
            Ok(Vec::new())
        }

        async fn usage_summary(&self) -> anyhow::Result<MemoryUsageSummary> {
            Ok(MemoryUsageSummary {
                short_term_records: 1,
                long_term_records: 3,
                stored_files: 3,
                total_bytes: 900,
            })
        }

        async fn save_state(&self) -> anyhow::Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn restore_state(&self, snapshot: &StateSnapshot) -> anyhow::Result<()> {
            if self.fail_restore_for.lock().await.contains(&snapshot.id) {
                bail!("refusing to restore {}", snapshot.id);
            }
            self.restored.lock().await.push(snapshot.id.clone());
            Ok(())
        }
    }

    /// Neural provider double holding a single blob.
    pub struct FixedNeural {
        pub current: Mutex<Option<NeuralState>>,
        pub loaded: Mutex<Vec<NeuralState>>,
    }

    impl FixedNeural {
        pub fn with_blob(data: &[u8]) -> Self {
            Self {
                current: Mutex::new(Some(NeuralState::new(1, data.to_vec()))),
                loaded: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NeuralStateProvider for FixedNeural {
        async fn current_state(&self) -> anyhow::Result<Option<NeuralState>> {
            Ok(self.current.lock().await.clone())
        }

        async fn load_state(&self, state: &NeuralState) -> anyhow::Result<()> {
            self.loaded.lock().await.push(state.clone());
            Ok(())
        }
    }

    pub struct Harness {
        pub manager: SnapshotManager,
        pub memory: Arc<RecordingMemory>,
        pub neural: Arc<FixedNeural>,
        pub clock: Arc<ManualClock>,
    }

    pub fn config(dir: &Path) -> StateConfig {
        StateConfig {
            directory: dir.to_path_buf(),
            ..StateConfig::default()
        }
    }

    pub async fn harness_with(config: StateConfig) -> Harness {
        let memory = Arc::new(RecordingMemory::default());
        let neural = Arc::new(FixedNeural::with_blob(b"synapse weights"));
        let clock = Arc::new(ManualClock::new(at(1_700_000_000)));
        let manager = SnapshotManager::open(&config, memory.clone(), neural.clone(), clock.clone())
            .await
            .unwrap();
        Harness {
            manager,
            memory,
            neural,
            clock,
        }
    }

    pub async fn harness(dir: &Path) -> Harness {
        harness_with(config(dir)).await
    }

    /// Flip the lowest bit of the byte in the middle of `path`.
    pub fn flip_middle_byte(path: &Path) {
        let mut bytes = std::fs::read(path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        std::fs::write(path, bytes).unwrap();
    }

    /// Damage the stored checksum while keeping the file decodable.
    pub fn corrupt_checksum(path: &Path) {
        let mut bytes = std::fs::read(path).unwrap();
        let marker = br#""checksum":""#;
        let at = bytes
            .windows(marker.len())
            .position(|w| w == marker)
            .unwrap()
            + marker.len();
        bytes[at] = if bytes[at] == b'0' { b'1' } else { b'0' };
        std::fs::write(path, bytes).unwrap();
    }
}
