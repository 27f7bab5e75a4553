//! Durable long-term record store.
//!
//! Each record lives in its own gzip-compressed file named
//! `<unixSeconds>_<id>.longterm`; a derived `id → path` index is kept in
//! memory and mirrored to `memory_index.json`.
//!
//! Locking: the index is guarded by its own map lock, and `io_lock` is held
//! only around filesystem calls (shared for reads, exclusive for writes).
//! Compression and JSON decoding always run on the blocking pool with no lock
//! held, so large searches decode in parallel.
//!
//! Mutations additionally hold `maintenance` shared for their whole
//! read-modify-write; `optimize_storage` and `rebuild_index` hold it
//! exclusively, so they never act on a copy a concurrent write replaced.
//! Lock order is `maintenance`, then `io_lock`, then the index.

mod maintenance;
mod search;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use synaptic_config::StorageConfig;

use crate::atomic::write_atomic;
use crate::clock::Clock;
use crate::codec;
use crate::error::StoreError;
use crate::events::StoreEvent;
use crate::index::{INDEX_FILE_NAME, RecordIndex};
use crate::schema::MemoryRecord;

pub use maintenance::{AgeBucket, StorageStats};

pub const RECORD_EXTENSION: &str = "longterm";

/// Broadcast channel capacity.  Slow subscribers lose the oldest events.
const EVENT_CAPACITY: usize = 256;

pub struct CompressedRecordStore {
    dir: PathBuf,
    index: RecordIndex,
    io_lock: RwLock<()>,
    maintenance: RwLock<()>,
    clock: Arc<dyn Clock>,
    compression_level: u32,
    archive_compression_level: u32,
    max_parallel_reads: usize,
    stats_sample_size: usize,
    default_search_limit: usize,
    last_optimized_at: Mutex<Option<DateTime<Utc>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl CompressedRecordStore {
    /// Open (or create) the store under `config.directory`.
    ///
    /// A missing or unreadable index side-file is rebuilt from the record
    /// files before the store is handed out.
    pub async fn open(config: &StorageConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let dir = config.directory.clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| StoreError::io(&dir, err))?;

        let index_path = dir.join(INDEX_FILE_NAME);
        let (index, needs_rebuild) = match RecordIndex::load(&index_path).await {
            Ok(index) => (index, false),
            Err(err) if err.is_not_found() => {
                debug!(path = %index_path.display(), "no memory index yet; scanning record files");
                (RecordIndex::empty(&index_path), true)
            }
            Err(err) => {
                warn!(%err, path = %index_path.display(), "memory index unreadable; rebuilding from record files");
                (RecordIndex::empty(&index_path), true)
            }
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            dir,
            index,
            io_lock: RwLock::new(()),
            maintenance: RwLock::new(()),
            clock,
            compression_level: config.compression_level.min(9),
            archive_compression_level: config.archive_compression_level.min(9),
            max_parallel_reads: config.max_parallel_reads.max(1),
            stats_sample_size: config.stats_sample_size,
            default_search_limit: config.default_search_limit,
            last_optimized_at: Mutex::new(None),
            events,
        };

        if needs_rebuild {
            store.rebuild_index().await?;
        }

        info!(
            dir = %store.dir.display(),
            records = store.index.len().await,
            "long-term record store opened"
        );
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> &Path {
        self.index.path()
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Number of indexed records.
    pub async fn len(&self) -> usize {
        self.index.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.index.is_empty().await
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.index.get(id).await.is_some()
    }

    /// File a record with the given id and timestamp is written to.
    pub fn record_path(&self, id: &str, timestamp: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{}_{id}.{RECORD_EXTENSION}", timestamp.timestamp()))
    }

    /// Persist `record`, assigning a timestamp when it has none.
    ///
    /// Returns the record as stored.  Any failure leaves no partially written
    /// file under the record's name and may simply be retried.
    pub async fn store(&self, record: MemoryRecord) -> Result<MemoryRecord, StoreError> {
        let _writer = self.maintenance.read().await;
        match self.write_record(record, self.compression_level).await {
            Ok(stored) => {
                self.emit(StoreEvent::RecordStored {
                    id: stored.id.clone(),
                });
                Ok(stored)
            }
            Err(err) => {
                self.report_failure("store", &err);
                Err(err)
            }
        }
    }

    /// Look up a record.  Missing files and undecodable files both yield
    /// `None`; a missing file also evicts the stale index entry.
    pub async fn retrieve(&self, id: &str) -> Option<MemoryRecord> {
        let path = self.index.get(id).await?;
        self.load_indexed(id, &path).await
    }

    /// Union `associations` into the record's set and re-store it.
    pub async fn update_associations(
        &self,
        id: &str,
        associations: impl IntoIterator<Item = String>,
    ) -> Result<MemoryRecord, StoreError> {
        let _writer = self.maintenance.read().await;
        let Some(mut record) = self.retrieve(id).await else {
            let err = StoreError::NotFound(id.to_string());
            self.report_failure("update_associations", &err);
            return Err(err);
        };
        record.associations.extend(associations);

        match self.write_record(record, self.compression_level).await {
            Ok(updated) => {
                self.emit(StoreEvent::RecordUpdated {
                    id: updated.id.clone(),
                });
                Ok(updated)
            }
            Err(err) => {
                self.report_failure("update_associations", &err);
                Err(err)
            }
        }
    }

    /// Remove a record and its index entry.  Returns `false` when the id was
    /// not indexed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _writer = self.maintenance.read().await;
        let Some(path) = self.index.remove(id).await else {
            return Ok(false);
        };
        self.remove_file(&path).await?;
        self.persist_index().await?;
        self.emit(StoreEvent::RecordDeleted { id: id.to_string() });
        Ok(true)
    }

    // ── internals ──────────────────────────────────────────────────────────

    async fn write_record(
        &self,
        mut record: MemoryRecord,
        level: u32,
    ) -> Result<MemoryRecord, StoreError> {
        validate_record(&record)?;
        let timestamp = *record.timestamp.get_or_insert_with(|| self.clock.now());
        record.compression_level = level;

        let to_encode = record.clone();
        let encoded = tokio::task::spawn_blocking(move || codec::encode(&to_encode, level))
            .await?
            .map_err(StoreError::Encode)?;

        let path = self.record_path(&record.id, timestamp);
        {
            let _io = self.io_lock.write().await;
            write_atomic(&path, &encoded)
                .await
                .map_err(|err| StoreError::io(&path, err))?;
        }

        if let Some(previous) = self.index.insert(record.id.clone(), path.clone()).await {
            if previous != path {
                if let Err(err) = self.remove_file(&previous).await {
                    warn!(%err, id = %record.id_short(), "could not remove superseded record file");
                }
            }
        }
        self.persist_index().await?;

        debug!(
            id = %record.id_short(),
            path = %path.display(),
            bytes = encoded.len(),
            "memory record written"
        );
        Ok(record)
    }

    pub(crate) async fn load_indexed(&self, id: &str, path: &Path) -> Option<MemoryRecord> {
        let bytes = match self.read_file(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if self.index.remove_if_path(id, path).await {
                    debug!(id, path = %path.display(), "evicted stale index entry");
                }
                return None;
            }
            Err(err) => {
                warn!(%err, id, path = %path.display(), "failed to read record file");
                return None;
            }
        };

        match decode_blocking(bytes).await {
            Ok(record) if record.id == id => Some(record),
            Ok(record) => {
                self.note_corrupt(path, format!("file holds record `{}`, index expected `{id}`", record.id));
                None
            }
            Err(reason) => {
                self.note_corrupt(path, reason);
                None
            }
        }
    }

    pub(crate) async fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let _io = self.io_lock.read().await;
        tokio::fs::read(path).await
    }

    async fn remove_file(&self, path: &Path) -> Result<(), StoreError> {
        let _io = self.io_lock.write().await;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    /// Mirror the in-memory index to `memory_index.json`.
    pub async fn persist_index(&self) -> Result<(), StoreError> {
        let _io = self.io_lock.write().await;
        let bytes = self.index.to_json().await?;
        write_atomic(self.index.path(), &bytes)
            .await
            .map_err(|err| StoreError::io(self.index.path(), err))
    }

    fn note_corrupt(&self, path: &Path, reason: String) {
        warn!(path = %path.display(), %reason, "corrupt record file treated as absent");
        self.emit(StoreEvent::RecordCorrupt {
            path: path.to_path_buf(),
            reason,
        });
    }

    fn report_failure(&self, operation: &str, err: &StoreError) {
        warn!(operation, %err, "record store operation failed");
        self.emit(StoreEvent::Error {
            operation: operation.to_string(),
            message: err.to_string(),
        });
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

/// Decode on the blocking pool; every failure collapses to a reason string.
pub(crate) async fn decode_blocking(bytes: Vec<u8>) -> Result<MemoryRecord, String> {
    match tokio::task::spawn_blocking(move || codec::decode(&bytes)).await {
        Ok(Ok(record)) => Ok(record),
        Ok(Err(err)) => Err(err.to_string()),
        Err(err) => Err(format!("decode task failed: {err}")),
    }
}

/// Ids become file names, so they must be non-empty and path-free.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.trim().is_empty() {
        return Err(StoreError::Validation("record id must not be empty".to_string()));
    }
    if id.contains(['/', '\\', '\0']) || id == "." || id == ".." {
        return Err(StoreError::Validation(format!(
            "record id `{id}` contains path characters"
        )));
    }
    Ok(())
}

fn validate_record(record: &MemoryRecord) -> Result<(), StoreError> {
    validate_id(&record.id)?;
    if !record.importance_score.is_finite() {
        return Err(StoreError::Validation(format!(
            "record `{}` has a non-finite importance score",
            record.id
        )));
    }
    if let Some((key, _)) = record.context.iter().find(|(_, value)| !value.is_finite()) {
        return Err(StoreError::Validation(format!(
            "record `{}` has a non-finite context value for `{key}`",
            record.id
        )));
    }
    Ok(())
}
