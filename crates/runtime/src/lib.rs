//! Sleep/wake persistence, self-verifying checkpoints and backups, and
//! recovery for a process whose long-term memory lives in
//! [`synaptic_memory::CompressedRecordStore`].

mod adapter;
mod error;
mod events;
pub mod integrity;
mod manager;
mod provider;
mod scheduler;
mod snapshot;

pub use adapter::StoreBackedMemory;
pub use error::StateError;
pub use events::StatusEvent;
pub use integrity::IntegrityError;
pub use manager::SnapshotManager;
pub use provider::{MemorySubsystem, NeuralStateProvider, NoNeuralState};
pub use scheduler::BackupScheduler;
pub use snapshot::{
    IntegrityReport, MemoryUsageSummary, NeuralState, SleepStatus, SnapshotInfo, SnapshotKind,
    StateSnapshot,
};
