//! [`MemorySubsystem`] backed by the compressed record store.
//!
//! Long-term records are durable; short-term records live only in process
//! memory and are gone after a restart.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use synaptic_memory::query::rank_by_importance;
use synaptic_memory::{CompressedRecordStore, MemoryRecord, MemoryType, SearchQuery, validate_id};

use crate::provider::MemorySubsystem;
use crate::snapshot::{MemoryUsageSummary, StateSnapshot};

pub struct StoreBackedMemory {
    store: Arc<CompressedRecordStore>,
    short_term: Mutex<Vec<MemoryRecord>>,
}

impl StoreBackedMemory {
    pub fn new(store: Arc<CompressedRecordStore>) -> Self {
        Self {
            store,
            short_term: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<CompressedRecordStore> {
        &self.store
    }
}

#[async_trait]
impl MemorySubsystem for StoreBackedMemory {
    async fn store_short_term(&self, mut record: MemoryRecord) -> anyhow::Result<MemoryRecord> {
        validate_id(&record.id)?;
        record.memory_type = MemoryType::ShortTerm;
        record.timestamp.get_or_insert_with(|| self.store.now());

        let mut short_term = self.short_term.lock().await;
        short_term.retain(|existing| existing.id != record.id);
        short_term.push(record.clone());
        debug!(id = %record.id_short(), held = short_term.len(), "short-term record held");
        Ok(record)
    }

    async fn store_long_term(&self, record: MemoryRecord) -> anyhow::Result<MemoryRecord> {
        let stored = self
            .store
            .store(record)
            .await
            .context("failed to persist long-term record")?;
        Ok(stored)
    }

    async fn recall(&self, query: &SearchQuery) -> anyhow::Result<Vec<MemoryRecord>> {
        let mut hits = self.store.search(&query.clone().with_limit(usize::MAX)).await;
        hits.extend(
            self.short_term
                .lock()
                .await
                .iter()
                .filter(|record| query.matches(record))
                .cloned(),
        );
        rank_by_importance(&mut hits);
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn usage_summary(&self) -> anyhow::Result<MemoryUsageSummary> {
        let stats = self
            .store
            .statistics()
            .await
            .context("failed to collect storage statistics")?;
        Ok(MemoryUsageSummary {
            short_term_records: self.short_term.lock().await.len(),
            long_term_records: stats.indexed_records,
            stored_files: stats.file_count,
            total_bytes: stats.total_bytes,
        })
    }

    async fn save_state(&self) -> anyhow::Result<()> {
        self.store
            .persist_index()
            .await
            .context("failed to persist memory index")
    }

    /// Record files are authoritative, so restoring means re-deriving the
    /// index from them.
    async fn restore_state(&self, snapshot: &StateSnapshot) -> anyhow::Result<()> {
        let records = self
            .store
            .rebuild_index()
            .await
            .context("failed to rebuild memory index")?;
        if records != snapshot.memory_usage.long_term_records {
            info!(
                snapshot = %snapshot.id,
                captured = snapshot.memory_usage.long_term_records,
                on_disk = records,
                "long-term record count differs from snapshot"
            );
        }
        Ok(())
    }
}
