//! Compaction, corruption cleanup, index rebuilds and statistics for
//! [`CompressedRecordStore`].

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::atomic::{TMP_SUFFIX, write_atomic};
use crate::codec;
use crate::error::StoreError;
use crate::events::{OptimizeReport, StoreEvent};
use crate::schema::MemoryRecord;

use super::{CompressedRecordStore, RECORD_EXTENSION, decode_blocking};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub file_count: usize,
    pub total_bytes: u64,
    pub average_bytes: f64,
    pub indexed_records: usize,
    /// Decoded JSON bytes per on-disk byte over a bounded sample of files.
    /// `0.0` when there is nothing to sample.
    pub compression_ratio: f64,
    pub last_optimized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgeBucket {
    Day,
    Week,
    Month,
    Older,
}

impl AgeBucket {
    pub fn of(age: Duration) -> Self {
        if age < Duration::days(1) {
            Self::Day
        } else if age < Duration::days(7) {
            Self::Week
        } else if age < Duration::days(30) {
            Self::Month
        } else {
            Self::Older
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Day => 0,
            Self::Week => 1,
            Self::Month => 2,
            Self::Older => 3,
        }
    }

    /// Buckets whose records are re-packed at the archive level.
    fn is_archival(self) -> bool {
        matches!(self, Self::Month | Self::Older)
    }
}

#[derive(Debug, Clone)]
struct RecordFile {
    path: PathBuf,
    size: u64,
    written_at: DateTime<Utc>,
}

/// `<unixSeconds>_<id>.longterm` → `(unixSeconds, id)`.
fn parse_record_file_name(name: &str) -> Option<(i64, &str)> {
    let stem = name.strip_suffix(RECORD_EXTENSION)?.strip_suffix('.')?;
    let (secs, id) = stem.split_once('_')?;
    Some((secs.parse().ok()?, id))
}

impl CompressedRecordStore {
    /// Age-bucketed compaction followed by a corruption sweep.  Writers wait
    /// for the pass to finish.
    ///
    /// Buckets holding more than one file are consolidated without dropping
    /// any live record: stale copies superseded by a newer indexed file are
    /// deleted, unindexed files are adopted into the index, and files older
    /// than a week are re-compressed at the archive level.  Every undecodable
    /// file is then deleted together with its index entries.
    pub async fn optimize_storage(&self) -> Result<OptimizeReport, StoreError> {
        let _exclusive = self.maintenance.write().await;
        let now = self.clock.now();
        let mut report = OptimizeReport {
            stale_tmp_removed: self.remove_stale_tmp_files().await?,
            ..OptimizeReport::default()
        };

        let mut buckets: BTreeMap<AgeBucket, Vec<RecordFile>> = BTreeMap::new();
        for file in self.scan_record_files().await? {
            buckets
                .entry(AgeBucket::of(now - file.written_at))
                .or_default()
                .push(file);
        }

        for (bucket, files) in &buckets {
            report.bucket_sizes[bucket.slot()] = files.len();
            if files.len() > 1 {
                self.consolidate_bucket(*bucket, files, &mut report).await;
            }
        }

        report.corrupt_removed = self.purge_corrupt_files().await?;
        self.persist_index().await?;
        *self.last_optimized_at.lock().await = Some(now);

        info!(
            buckets = ?report.bucket_sizes,
            superseded = report.superseded_removed,
            adopted = report.adopted,
            recompressed = report.recompressed,
            corrupt = report.corrupt_removed,
            "record storage optimized"
        );
        self.emit(StoreEvent::StorageOptimized(report.clone()));
        Ok(report)
    }

    /// Re-derive the index from the record files on disk.
    ///
    /// When several files hold the same id the newest timestamp wins.
    /// Unreadable files are skipped and writers wait for the swap.  Returns
    /// the number of indexed records.
    pub async fn rebuild_index(&self) -> Result<usize, StoreError> {
        let _exclusive = self.maintenance.write().await;
        let files = self.scan_record_files().await?;
        let scanned = files.len();
        let decoded = stream::iter(files)
            .map(|file| async move {
                let record = self.decode_file(&file.path).await;
                (file.path, record)
            })
            .buffer_unordered(self.max_parallel_reads)
            .collect::<Vec<_>>()
            .await;

        let mut newest: HashMap<String, (Option<DateTime<Utc>>, PathBuf)> = HashMap::new();
        let mut skipped = 0usize;
        for (path, record) in decoded {
            match record {
                Ok(record) => {
                    let candidate = (record.timestamp, path);
                    match newest.get(&record.id) {
                        Some(current) if *current >= candidate => {}
                        _ => {
                            newest.insert(record.id, candidate);
                        }
                    }
                }
                Err(reason) => {
                    skipped += 1;
                    warn!(path = %path.display(), %reason, "skipping unreadable record file during index rebuild");
                }
            }
        }

        let rebuilt = newest
            .into_iter()
            .map(|(id, (_, path))| (id, path))
            .collect::<HashMap<_, _>>();
        let records = rebuilt.len();
        self.index.replace_all(rebuilt).await;
        self.persist_index().await?;

        info!(records, scanned, skipped, "memory index rebuilt from record files");
        self.emit(StoreEvent::IndexRebuilt { records });
        Ok(records)
    }

    pub async fn statistics(&self) -> Result<StorageStats, StoreError> {
        let files = self.scan_record_files().await?;
        let file_count = files.len();
        let total_bytes = files.iter().map(|f| f.size).sum::<u64>();

        let mut sampled_disk = 0u64;
        let mut sampled_decoded = 0u64;
        for file in files.iter().take(self.stats_sample_size) {
            let Ok(bytes) = self.read_file(&file.path).await else { continue };
            let disk = bytes.len() as u64;
            if let Ok(Ok(json)) = tokio::task::spawn_blocking(move || codec::decompress(&bytes)).await {
                sampled_disk += disk;
                sampled_decoded += json.len() as u64;
            }
        }

        Ok(StorageStats {
            file_count,
            total_bytes,
            average_bytes: if file_count == 0 {
                0.0
            } else {
                total_bytes as f64 / file_count as f64
            },
            indexed_records: self.index.len().await,
            compression_ratio: if sampled_disk == 0 {
                0.0
            } else {
                sampled_decoded as f64 / sampled_disk as f64
            },
            last_optimized_at: *self.last_optimized_at.lock().await,
        })
    }

    // ── internals ──────────────────────────────────────────────────────────

    async fn consolidate_bucket(
        &self,
        bucket: AgeBucket,
        files: &[RecordFile],
        report: &mut OptimizeReport,
    ) {
        for file in files {
            // Undecodable files are left for the corruption sweep.
            let Ok(record) = self.decode_file(&file.path).await else { continue };

            match self.index.get(&record.id).await {
                Some(indexed) if indexed == file.path => {}
                Some(indexed) if tokio::fs::try_exists(&indexed).await.unwrap_or(false) => {
                    match self.remove_file(&file.path).await {
                        Ok(()) => {
                            debug!(id = %record.id_short(), path = %file.path.display(), "removed superseded record copy");
                            report.superseded_removed += 1;
                        }
                        Err(err) => warn!(%err, "could not remove superseded record copy"),
                    }
                    continue;
                }
                _ => {
                    self.index.insert(record.id.clone(), file.path.clone()).await;
                    report.adopted += 1;
                }
            }

            if bucket.is_archival() && record.compression_level < self.archive_compression_level {
                match self.recompress(record, &file.path).await {
                    Ok(()) => report.recompressed += 1,
                    Err(err) => warn!(%err, path = %file.path.display(), "archive re-compression failed"),
                }
            }
        }
    }

    async fn recompress(&self, mut record: MemoryRecord, path: &Path) -> Result<(), StoreError> {
        let level = self.archive_compression_level;
        record.compression_level = level;
        let encoded = tokio::task::spawn_blocking(move || codec::encode(&record, level))
            .await?
            .map_err(StoreError::Encode)?;
        let _io = self.io_lock.write().await;
        write_atomic(path, &encoded)
            .await
            .map_err(|err| StoreError::io(path, err))
    }

    async fn purge_corrupt_files(&self) -> Result<usize, StoreError> {
        let mut removed = 0usize;
        for file in self.scan_record_files().await? {
            let reason = match self.read_file(&file.path).await {
                Ok(bytes) => match decode_blocking(bytes).await {
                    Ok(_) => continue,
                    Err(reason) => reason,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(%err, path = %file.path.display(), "cannot read record file during corruption sweep");
                    continue;
                }
            };

            warn!(path = %file.path.display(), %reason, "deleting corrupt record file");
            self.remove_file(&file.path).await?;
            let evicted = self.index.remove_path(&file.path).await;
            debug!(?evicted, "dropped index entries of corrupt file");
            self.emit(StoreEvent::RecordCorrupt {
                path: file.path.clone(),
                reason,
            });
            removed += 1;
        }
        Ok(removed)
    }

    /// Delete `*.longterm.tmp` leftovers.  Holding the exclusive I/O lock
    /// guarantees no write is in flight, so any such file is stale.
    async fn remove_stale_tmp_files(&self) -> Result<usize, StoreError> {
        let _io = self.io_lock.write().await;
        let suffix = format!(".{RECORD_EXTENSION}.{TMP_SUFFIX}");
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|err| StoreError::io(&self.dir, err))?;
        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(&self.dir, err))?
        {
            if entry.file_name().to_string_lossy().ends_with(&suffix)
                && tokio::fs::remove_file(entry.path()).await.is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn decode_file(&self, path: &Path) -> Result<MemoryRecord, String> {
        let bytes = self.read_file(path).await.map_err(|err| err.to_string())?;
        decode_blocking(bytes).await
    }

    /// All `*.longterm` files, sorted by path.
    async fn scan_record_files(&self) -> Result<Vec<RecordFile>, StoreError> {
        let _io = self.io_lock.read().await;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|err| StoreError::io(&self.dir, err))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(&self.dir, err))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(&format!(".{RECORD_EXTENSION}")) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else { continue };
            if !meta.is_file() {
                continue;
            }
            let from_name = parse_record_file_name(&name)
                .and_then(|(secs, _)| DateTime::<Utc>::from_timestamp(secs, 0));
            let written_at = from_name
                .or_else(|| meta.modified().ok().map(DateTime::<Utc>::from))
                .unwrap_or_else(|| self.clock.now());
            files.push(RecordFile {
                path: entry.path(),
                size: meta.len(),
                written_at,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::super::test_support::{at, open};
    use super::*;
    use crate::clock::ManualClock;
    use crate::index::INDEX_FILE_NAME;
    use crate::query::SearchQuery;
    use crate::schema::MemoryType;

    const NOW: i64 = 1_700_000_000;
    const DAY: i64 = 86_400;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(at(NOW)))
    }

    fn record(id: &str, secs: i64) -> MemoryRecord {
        MemoryRecord::new(format!("memory {id} ").repeat(20), MemoryType::LongTerm)
            .with_id(id)
            .with_timestamp(at(secs))
    }

    #[test]
    fn file_names_parse() {
        assert_eq!(parse_record_file_name("100_abc.longterm"), Some((100, "abc")));
        assert_eq!(parse_record_file_name("100_a_b.longterm"), Some((100, "a_b")));
        assert_eq!(parse_record_file_name("-5_x.longterm"), Some((-5, "x")));
        assert_eq!(parse_record_file_name("memory_index.json"), None);
        assert_eq!(parse_record_file_name("abc_x.longterm"), None);
    }

    #[test]
    fn age_buckets() {
        assert_eq!(AgeBucket::of(Duration::hours(23)), AgeBucket::Day);
        assert_eq!(AgeBucket::of(Duration::days(1)), AgeBucket::Week);
        assert_eq!(AgeBucket::of(Duration::days(29)), AgeBucket::Month);
        assert_eq!(AgeBucket::of(Duration::days(30)), AgeBucket::Older);
        assert_eq!(AgeBucket::of(Duration::seconds(-10)), AgeBucket::Day);
    }

    #[tokio::test]
    async fn rebuild_after_index_deletion_restores_every_record() {
        let dir = TempDir::new().unwrap();
        let ids = ["alpha", "beta", "gamma", "delta"];
        {
            let store = open(dir.path(), clock()).await;
            for (i, id) in ids.iter().enumerate() {
                store.store(record(id, NOW - i as i64)).await.unwrap();
            }
        }

        std::fs::remove_file(dir.path().join(INDEX_FILE_NAME)).unwrap();
        let store = open(dir.path(), clock()).await;
        for (i, id) in ids.iter().enumerate() {
            let back = store.retrieve(id).await.unwrap();
            let expected = record(id, NOW - i as i64);
            assert_eq!(back.content, expected.content);
            assert_eq!(back.timestamp, expected.timestamp);
            assert_eq!(back.compression_level, 6);
        }
    }

    #[tokio::test]
    async fn corrupt_index_file_self_heals_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(dir.path(), clock()).await;
            store.store(record("one", NOW)).await.unwrap();
            store.store(record("two", NOW)).await.unwrap();
        }
        std::fs::write(dir.path().join(INDEX_FILE_NAME), b"\0\0garbage").unwrap();

        let store = open(dir.path(), clock()).await;
        assert_eq!(store.len().await, 2);
        assert_eq!(store.retrieve("two").await.unwrap().content, record("two", NOW).content);
    }

    #[tokio::test]
    async fn explicit_rebuild_skips_unreadable_files() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path(), clock()).await;
        store.store(record("ok", NOW)).await.unwrap();
        std::fs::write(dir.path().join("5_bad.longterm"), b"nope").unwrap();

        assert_eq!(store.rebuild_index().await.unwrap(), 1);
        assert!(store.contains("ok").await);
        assert!(!store.contains("bad").await);
    }

    #[tokio::test]
    async fn rebuild_prefers_newest_copy() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path(), clock()).await;
        let older = codec::encode(&record("dup", 100), 6).unwrap();
        let newer = codec::encode(&record("dup", 200).with_importance(0.9), 6).unwrap();
        std::fs::write(dir.path().join("100_dup.longterm"), older).unwrap();
        std::fs::write(dir.path().join("200_dup.longterm"), newer).unwrap();

        store.rebuild_index().await.unwrap();
        let back = store.retrieve("dup").await.unwrap();
        assert_eq!(back.timestamp, Some(at(200)));
        assert!((back.importance_score - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn optimize_removes_corrupt_files_and_keeps_live_records() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path(), clock()).await;
        store.store(record("fresh-1", NOW - 10)).await.unwrap();
        store.store(record("fresh-2", NOW - 20)).await.unwrap();
        store.store(record("week", NOW - 3 * DAY)).await.unwrap();
        store.store(record("ancient-1", NOW - 90 * DAY)).await.unwrap();
        store.store(record("ancient-2", NOW - 95 * DAY)).await.unwrap();
        let broken = store.record_path("fresh-2", at(NOW - 20));
        std::fs::write(&broken, b"corrupted bytes").unwrap();

        let report = store.optimize_storage().await.unwrap();
        assert_eq!(report.bucket_sizes, [2, 1, 0, 2]);
        assert_eq!(report.corrupt_removed, 1);
        assert_eq!(report.recompressed, 2);
        assert_eq!(report.superseded_removed, 0);
        assert!(!broken.exists());
        assert!(!store.contains("fresh-2").await);

        let survivors = store.search(&SearchQuery::default()).await;
        assert_eq!(survivors.len(), 4);
        let ancient = store.retrieve("ancient-1").await.unwrap();
        assert_eq!(ancient.compression_level, 9);
        assert_eq!(ancient.content, record("ancient-1", 0).content);

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.last_optimized_at, Some(at(NOW)));
    }

    #[tokio::test]
    async fn optimize_drops_superseded_copy_and_adopts_orphans() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path(), clock()).await;
        store.store(record("kept", NOW - 100)).await.unwrap();
        // A stale copy of `kept` and a file nobody indexed, both from today.
        let stale = codec::encode(&record("kept", NOW - 200), 6).unwrap();
        let orphan = codec::encode(&record("orphan", NOW - 300), 6).unwrap();
        std::fs::write(dir.path().join(format!("{}_kept.longterm", NOW - 200)), stale).unwrap();
        std::fs::write(dir.path().join(format!("{}_orphan.longterm", NOW - 300)), orphan).unwrap();
        std::fs::write(dir.path().join("1_leftover.longterm.tmp"), b"partial").unwrap();

        let report = store.optimize_storage().await.unwrap();
        assert_eq!(report.superseded_removed, 1);
        assert_eq!(report.adopted, 1);
        assert_eq!(report.stale_tmp_removed, 1);
        assert!(store.retrieve("orphan").await.is_some());
        assert_eq!(store.retrieve("kept").await.unwrap().timestamp, Some(at(NOW - 100)));
        assert!(!dir.path().join(format!("{}_kept.longterm", NOW - 200)).exists());
    }

    #[tokio::test]
    async fn update_during_optimize_is_not_overwritten_by_archive_pass() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path(), clock()).await;
        store.store(record("old-a", NOW - 60 * DAY)).await.unwrap();
        store.store(record("old-b", NOW - 61 * DAY)).await.unwrap();

        let (report, updated) = tokio::join!(
            store.optimize_storage(),
            store.update_associations("old-a", ["old-b".to_string()]),
        );
        report.unwrap();
        updated.unwrap();

        let back = store.retrieve("old-a").await.unwrap();
        assert!(back.associations.contains("old-b"));
        assert_eq!(back.timestamp, Some(at(NOW - 60 * DAY)));
    }

    #[tokio::test]
    async fn writers_wait_for_maintenance() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path(), clock()).await;
        let stored = store.store(record("x", NOW - 60 * DAY)).await.unwrap();
        let path = store.record_path("x", stored.timestamp.unwrap());
        let before = std::fs::read(&path).unwrap();

        let exclusive = store.maintenance.write().await;
        let update = store.update_associations("x", ["y".to_string()]);
        tokio::pin!(update);
        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), &mut update).await;
        assert!(waited.is_err(), "update must not run during a maintenance pass");
        assert_eq!(std::fs::read(&path).unwrap(), before);

        drop(exclusive);
        let updated = update.await.unwrap();
        assert!(updated.associations.contains("y"));
    }

    #[tokio::test]
    async fn store_during_rebuild_stays_indexed() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path(), clock()).await;
        for i in 0..8 {
            store.store(record(&format!("r{i}"), NOW - i)).await.unwrap();
        }

        let (rebuilt, stored) = tokio::join!(
            store.rebuild_index(),
            store.store(record("late", NOW)),
        );
        rebuilt.unwrap();
        stored.unwrap();

        assert!(store.contains("late").await);
        assert_eq!(store.len().await, 9);
    }

    #[tokio::test]
    async fn statistics_report_sizes_and_ratio() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path(), clock()).await;
        let empty = store.statistics().await.unwrap();
        assert_eq!(empty.file_count, 0);
        assert_eq!(empty.compression_ratio, 0.0);
        assert_eq!(empty.last_optimized_at, None);

        store.store(record("s1", NOW)).await.unwrap();
        store.store(record("s2", NOW)).await.unwrap();
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.indexed_records, 2);
        assert!(stats.total_bytes > 0);
        assert!((stats.average_bytes - stats.total_bytes as f64 / 2.0).abs() < 1e-9);
        assert!(stats.compression_ratio > 1.0, "repetitive content should compress");
    }
}
