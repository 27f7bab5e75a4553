//! `memory_id → file path` index for the compressed record store.
//!
//! The record files are the **canonical source of truth**.  This index is a
//! derived cache persisted as `memory_index.json`; when the side-file is
//! absent or unreadable the store rebuilds it from a directory scan.
//!
//! Every method is a single map operation under a short-lived lock, so
//! concurrent readers and writers never observe a half-applied update.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use crate::error::StoreError;

pub const INDEX_FILE_NAME: &str = "memory_index.json";

#[derive(Debug)]
pub struct RecordIndex {
    path: PathBuf,
    entries: RwLock<HashMap<String, PathBuf>>,
}

impl RecordIndex {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Load the side-file.  A missing or malformed file is an error so the
    /// caller can fall back to a rebuild.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|err| StoreError::io(&path, err))?;
        let parsed: BTreeMap<String, PathBuf> = serde_json::from_slice(&raw)?;
        Ok(Self {
            path,
            entries: RwLock::new(parsed.into_iter().collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, id: &str) -> Option<PathBuf> {
        self.entries.read().await.get(id).cloned()
    }

    /// Upsert; returns the previously indexed path, if any.
    pub async fn insert(&self, id: impl Into<String>, path: PathBuf) -> Option<PathBuf> {
        self.entries.write().await.insert(id.into(), path)
    }

    pub async fn remove(&self, id: &str) -> Option<PathBuf> {
        self.entries.write().await.remove(id)
    }

    /// Remove `id` only while it still points at `path`.  Used to evict stale
    /// entries without clobbering a concurrent re-store of the same id.
    pub async fn remove_if_path(&self, id: &str, path: &Path) -> bool {
        let mut entries = self.entries.write().await;
        if entries.get(id).is_some_and(|current| current == path) {
            entries.remove(id);
            true
        } else {
            false
        }
    }

    /// Drop every entry pointing at `path`; returns the evicted ids.
    pub async fn remove_path(&self, path: &Path) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let ids = entries
            .iter()
            .filter(|(_, p)| p.as_path() == path)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in &ids {
            entries.remove(id);
        }
        ids
    }

    pub async fn replace_all(&self, map: HashMap<String, PathBuf>) {
        *self.entries.write().await = map;
    }

    /// Point-in-time copy of all entries, sorted by id.
    pub async fn entries(&self) -> Vec<(String, PathBuf)> {
        let mut all = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect::<Vec<_>>();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Pretty JSON of the sorted map, as written to the side-file.
    pub async fn to_json(&self) -> Result<Vec<u8>, StoreError> {
        let sorted = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect::<BTreeMap<_, _>>();
        Ok(serde_json::to_vec_pretty(&sorted)?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn insert_overwrites_and_reports_previous() {
        let index = RecordIndex::empty("/tmp/unused.json");
        assert!(index.insert("a", PathBuf::from("/x/1_a.longterm")).await.is_none());
        let previous = index.insert("a", PathBuf::from("/x/2_a.longterm")).await;
        assert_eq!(previous, Some(PathBuf::from("/x/1_a.longterm")));
        assert_eq!(index.get("a").await, Some(PathBuf::from("/x/2_a.longterm")));
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn remove_if_path_ignores_newer_entry() {
        let index = RecordIndex::empty("/tmp/unused.json");
        index.insert("a", PathBuf::from("/x/2_a.longterm")).await;
        assert!(!index.remove_if_path("a", Path::new("/x/1_a.longterm")).await);
        assert!(index.remove_if_path("a", Path::new("/x/2_a.longterm")).await);
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn side_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(INDEX_FILE_NAME);
        let index = RecordIndex::empty(&path);
        index.insert("b", dir.path().join("2_b.longterm")).await;
        index.insert("a", dir.path().join("1_a.longterm")).await;
        std::fs::write(&path, index.to_json().await.unwrap()).unwrap();

        let loaded = RecordIndex::load(&path).await.unwrap();
        let entries = loaded.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[1].1, dir.path().join("2_b.longterm"));
    }

    #[tokio::test]
    async fn load_rejects_missing_and_malformed_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(INDEX_FILE_NAME);
        assert!(RecordIndex::load(&path).await.unwrap_err().is_not_found());

        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            RecordIndex::load(&path).await,
            Err(StoreError::Index(_))
        ));
    }
}
