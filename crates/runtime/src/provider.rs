//! Collaborators the snapshot manager drives but does not own.

use async_trait::async_trait;

use synaptic_memory::{MemoryRecord, SearchQuery};

use crate::snapshot::{MemoryUsageSummary, NeuralState, StateSnapshot};

#[async_trait]
pub trait MemorySubsystem: Send + Sync {
    async fn store_short_term(&self, record: MemoryRecord) -> anyhow::Result<MemoryRecord>;

    async fn store_long_term(&self, record: MemoryRecord) -> anyhow::Result<MemoryRecord>;

    async fn recall(&self, query: &SearchQuery) -> anyhow::Result<Vec<MemoryRecord>>;

    async fn usage_summary(&self) -> anyhow::Result<MemoryUsageSummary>;

    /// Flush whatever the subsystem needs to survive a restart.
    async fn save_state(&self) -> anyhow::Result<()>;

    /// Bring the subsystem back in line with a previously captured snapshot.
    async fn restore_state(&self, snapshot: &StateSnapshot) -> anyhow::Result<()>;
}

#[async_trait]
pub trait NeuralStateProvider: Send + Sync {
    /// `None` when there is nothing worth capturing yet.
    async fn current_state(&self) -> anyhow::Result<Option<NeuralState>>;

    async fn load_state(&self, state: &NeuralState) -> anyhow::Result<()>;
}

/// Provider for deployments without a neural component.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNeuralState;

#[async_trait]
impl NeuralStateProvider for NoNeuralState {
    async fn current_state(&self) -> anyhow::Result<Option<NeuralState>> {
        Ok(None)
    }

    async fn load_state(&self, state: &NeuralState) -> anyhow::Result<()> {
        tracing::debug!(
            schema_version = state.schema_version,
            bytes = state.data.len(),
            "ignoring neural state: no provider configured"
        );
        Ok(())
    }
}
