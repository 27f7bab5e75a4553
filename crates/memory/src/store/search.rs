//! Query paths of [`CompressedRecordStore`].  All of them fan out over the
//! whole index and quietly skip records that are missing or corrupt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use tracing::debug;

use crate::query::{
    SearchQuery, context_match_fraction, rank_by_context_fraction, rank_by_importance,
    rank_by_recency, within,
};
use crate::schema::{ContextValue, MemoryRecord};

use super::CompressedRecordStore;

impl CompressedRecordStore {
    /// Load every indexed record, at most `max_parallel_reads` at a time.
    pub(crate) async fn load_all(&self) -> Vec<MemoryRecord> {
        let entries = self.index.entries().await;
        let total = entries.len();
        let records = stream::iter(entries)
            .map(|(id, path)| async move { self.load_indexed(&id, &path).await })
            .buffer_unordered(self.max_parallel_reads)
            .filter_map(|record| async move { record })
            .collect::<Vec<_>>()
            .await;
        if records.len() < total {
            debug!(indexed = total, readable = records.len(), "search skipped unreadable records");
        }
        records
    }

    pub async fn search(&self, query: &SearchQuery) -> Vec<MemoryRecord> {
        let mut hits = self
            .load_all()
            .await
            .into_iter()
            .filter(|record| query.matches(record))
            .collect::<Vec<_>>();
        rank_by_importance(&mut hits);
        hits.truncate(query.limit.unwrap_or(self.default_search_limit));
        hits
    }

    pub async fn search_by_context(
        &self,
        criteria: &BTreeMap<String, ContextValue>,
    ) -> Vec<MemoryRecord> {
        let mut scored = self
            .load_all()
            .await
            .into_iter()
            .filter_map(|record| context_match_fraction(&record, criteria).map(|f| (f, record)))
            .collect::<Vec<_>>();
        rank_by_context_fraction(&mut scored);
        scored.into_iter().map(|(_, record)| record).collect()
    }

    pub async fn search_by_temporal_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<MemoryRecord> {
        let mut hits = self
            .load_all()
            .await
            .into_iter()
            .filter(|record| within(record.timestamp, Some(start), Some(end)))
            .collect::<Vec<_>>();
        rank_by_recency(&mut hits);
        hits
    }

    /// Records linked to `anchor_id`, including the anchor itself.
    pub async fn search_by_association(&self, anchor_id: &str) -> Vec<MemoryRecord> {
        let mut hits = self
            .load_all()
            .await
            .into_iter()
            .filter(|record| record.id == anchor_id || record.associations.contains(anchor_id))
            .collect::<Vec<_>>();
        rank_by_importance(&mut hits);
        hits
    }
}
