//! Long-term memory persistence: compressed per-record files, a derived
//! id index, and the search family over them.

pub mod atomic;
pub mod clock;
pub mod codec;
pub mod error;
pub mod events;
pub mod index;
pub mod query;
pub mod schema;
pub mod store;

pub use atomic::write_atomic;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use events::{OptimizeReport, StoreEvent};
pub use query::SearchQuery;
pub use schema::{ContextValue, MemoryRecord, MemoryType};
pub use store::{AgeBucket, CompressedRecordStore, StorageStats, validate_id};
