//! Tiered durable record store.
//!
//! Two backends behind one facade: a fast, quota-limited primary tier and a
//! SQLite secondary tier that absorbs capacity overflow. The facade never
//! returns errors to callers; failures degrade into outcome reports so the
//! application keeps running with whatever storage is left.

pub mod backend;
pub mod primary;
pub mod record;
pub mod secondary;
pub mod tiered;

pub use backend::{
    BackendKind, MetricsSnapshot, Result, StorageBackend, StoreError, StoreMetrics,
};
pub use primary::FileBackend;
pub use record::StoredRecord;
pub use secondary::SqliteBackend;
pub use tiered::{ClearOutcome, DurableStore, SaveOutcome, StorageInfo, StoreOptions};
