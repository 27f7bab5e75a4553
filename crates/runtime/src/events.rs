use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::snapshot::{SleepStatus, SnapshotKind};

/// Fire-and-forget notifications from the snapshot manager.  Delivery is
/// best effort; nothing in the durability path waits on a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatusEvent {
    SleepStatusChanged(SleepStatus),
    CheckpointCreated { id: String, path: PathBuf },
    BackupCreated { id: String, kind: SnapshotKind, path: PathBuf },
    Restored { id: String, kind: SnapshotKind },
    Error { operation: String, message: String },
    /// Every checkpoint and backup failed to validate or restore.
    RecoveryExhausted { checkpoints: usize, backups: usize },
}
