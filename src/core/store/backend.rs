//! Backend contract shared by both tiers of the record store.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::record::StoredRecord;

/// Errors that can occur during record store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record does not fit within the primary tier's byte quota.
    #[error("record of {needed} bytes exceeds primary capacity (quota {quota} bytes)")]
    CapacityExceeded { needed: u64, quota: u64 },

    /// The backend could not be opened or has gone away.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// I/O error during filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite error from the secondary tier.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Which tier handled an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Primary,
    Secondary,
}

/// Trait defining the interface for record store tiers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persists a record, replacing any previous record under the same key.
    async fn put(&self, record: &StoredRecord) -> Result<()>;

    /// Retrieves a record by key.
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>>;

    /// Deletes a record by key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every record held by this tier.
    async fn clear(&self) -> Result<()>;

    /// Approximate bytes of storage this tier currently occupies.
    async fn usage_bytes(&self) -> Result<u64>;

    /// Which tier this backend implements.
    fn kind(&self) -> BackendKind;
}

/// Metrics tracking for store operations.
#[derive(Debug, Clone)]
pub struct StoreMetrics {
    primary_hits: Arc<RwLock<u64>>,
    secondary_hits: Arc<RwLock<u64>>,
    misses: Arc<RwLock<u64>>,
    primary_saves: Arc<RwLock<u64>>,
    fallback_saves: Arc<RwLock<u64>>,
    failed_saves: Arc<RwLock<u64>>,
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreMetrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            primary_hits: Arc::new(RwLock::new(0)),
            secondary_hits: Arc::new(RwLock::new(0)),
            misses: Arc::new(RwLock::new(0)),
            primary_saves: Arc::new(RwLock::new(0)),
            fallback_saves: Arc::new(RwLock::new(0)),
            failed_saves: Arc::new(RwLock::new(0)),
        }
    }

    /// Records a load served by the given tier.
    pub fn record_hit(&self, kind: BackendKind) {
        match kind {
            BackendKind::Primary => *self.primary_hits.write() += 1,
            BackendKind::Secondary => *self.secondary_hits.write() += 1,
        }
    }

    /// Records a load that neither tier could serve.
    pub fn record_miss(&self) {
        *self.misses.write() += 1;
    }

    /// Records a save absorbed by the given tier.
    pub fn record_save(&self, kind: BackendKind) {
        match kind {
            BackendKind::Primary => *self.primary_saves.write() += 1,
            BackendKind::Secondary => *self.fallback_saves.write() += 1,
        }
    }

    /// Records a save that no tier could absorb.
    pub fn record_failed_save(&self) {
        *self.failed_saves.write() += 1;
    }

    /// Returns a point-in-time view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            primary_hits: *self.primary_hits.read(),
            secondary_hits: *self.secondary_hits.read(),
            misses: *self.misses.read(),
            primary_saves: *self.primary_saves.read(),
            fallback_saves: *self.fallback_saves.read(),
            failed_saves: *self.failed_saves.read(),
        }
    }
}

/// Counter snapshot reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub primary_hits: u64,
    pub secondary_hits: u64,
    pub misses: u64,
    pub primary_saves: u64,
    pub fallback_saves: u64,
    pub failed_saves: u64,
}
