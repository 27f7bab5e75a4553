use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Outcome counters of one `optimize_storage` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeReport {
    /// Files per age bucket, in bucket order (`<1d`, `<7d`, `<30d`, older).
    pub bucket_sizes: [usize; 4],
    /// Older copies of a record whose index entry points at a newer file.
    pub superseded_removed: usize,
    /// Files found on disk but missing from the index.
    pub adopted: usize,
    /// Files rewritten at the archive compression level.
    pub recompressed: usize,
    /// Undecodable files deleted together with their index entries.
    pub corrupt_removed: usize,
    /// Leftover `.tmp` files from interrupted writes.
    pub stale_tmp_removed: usize,
}

/// Fire-and-forget notifications raised by the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreEvent {
    RecordStored { id: String },
    RecordUpdated { id: String },
    RecordDeleted { id: String },
    RecordCorrupt { path: PathBuf, reason: String },
    StorageOptimized(OptimizeReport),
    IndexRebuilt { records: usize },
    Error { operation: String, message: String },
}
