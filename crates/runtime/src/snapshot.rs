//! Snapshot model shared by the canonical state file, checkpoints and backups.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotKind {
    /// The canonical `current_state.json` written on sleep.
    Current,
    Manual,
    Automatic,
    Checkpoint,
}

impl SnapshotKind {
    /// Artifacts other than the canonical state file must carry a checksum.
    pub fn requires_checksum(self) -> bool {
        !matches!(self, Self::Current)
    }
}

/// Opaque state captured from the neural-state provider.  This layer never
/// interprets `data`; `schema_version` lets the provider reject blobs it
/// cannot load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuralState {
    pub schema_version: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl NeuralState {
    pub fn new(schema_version: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            schema_version,
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsageSummary {
    pub short_term_records: usize,
    pub long_term_records: usize,
    pub stored_files: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepStatus {
    pub is_sleeping: bool,
    pub last_sleep_time: Option<DateTime<Utc>>,
    pub last_wake_time: Option<DateTime<Utc>>,
    /// Informational only; nothing in this layer sleeps on its own.
    pub auto_sleep_enabled: bool,
    pub canonical_save_location: PathBuf,
}

impl SleepStatus {
    pub fn awake(canonical_save_location: impl Into<PathBuf>, auto_sleep_enabled: bool) -> Self {
        Self {
            is_sleeping: false,
            last_sleep_time: None,
            last_wake_time: None,
            auto_sleep_enabled,
            canonical_save_location: canonical_save_location.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: SnapshotKind,
    pub neural_state: Option<NeuralState>,
    pub memory_usage: MemoryUsageSummary,
    pub sleep_status: SleepStatus,
    /// SHA-256 over the canonical encoding of every other field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Listing entry for checkpoints and backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub kind: SnapshotKind,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Result of `validate_state_integrity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub path: PathBuf,
    pub valid: bool,
    /// Non-fatal observations (fresh modification time, suspicious size).
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
