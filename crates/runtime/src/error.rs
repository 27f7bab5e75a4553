use std::path::PathBuf;

use thiserror::Error;

use crate::integrity::IntegrityError;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state artifact `{0}` not found")]
    NotFound(String),

    #[error("state artifact {} is corrupted: {source}", .path.display())]
    Corrupted {
        path: PathBuf,
        #[source]
        source: IntegrityError,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("memory subsystem failed: {0:#}")]
    Memory(anyhow::Error),

    #[error("neural state provider failed: {0:#}")]
    Neural(anyhow::Error),

    #[error(
        "no checkpoint or backup could be restored ({checkpoints} checkpoints, {backups} backups tried)"
    )]
    RecoveryExhausted { checkpoints: usize, backups: usize },
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupted(path: impl Into<PathBuf>, source: IntegrityError) -> Self {
        Self::Corrupted {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_corrupted(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}
