//! Two-tier store facade with capacity spillover.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::backend::{BackendKind, MetricsSnapshot, Result, StorageBackend, StoreError, StoreMetrics};
use super::primary::FileBackend;
use super::record::StoredRecord;
use super::secondary::SqliteBackend;
use crate::core::connectivity::ConnectivityMonitor;

/// Filesystem locations and limits for the two tiers.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub records_dir: PathBuf,
    pub primary_quota_bytes: u64,
    /// None disables the secondary tier outright.
    pub sqlite_path: Option<PathBuf>,
}

/// Outcome of a save, as reported to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_used: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveOutcome {
    fn stored(kind: BackendKind) -> Self {
        Self {
            success: true,
            backend_used: Some(kind),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            backend_used: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a clear, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ClearOutcome {
    pub success: bool,
}

/// Byte usage across both tiers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub primary_bytes: u64,
    pub secondary_bytes: u64,
    #[serde(rename = "totalMB")]
    pub total_mb: f64,
}

/// Tiered durable store.
///
/// Saves land in the primary tier until its quota rejects them, then spill
/// into the secondary tier while online. Loads try the primary tier first
/// and fall back to the secondary on absence or read failure. The tiers are
/// independent; the same key may transiently exist in both with different
/// values, and loads prefer the primary copy.
pub struct DurableStore {
    primary: Arc<dyn StorageBackend>,
    secondary: Option<Arc<dyn StorageBackend>>,
    connectivity: Arc<ConnectivityMonitor>,
    metrics: StoreMetrics,
}

impl DurableStore {
    /// Opens both tiers. A failed primary open is fatal; a failed secondary
    /// open logs and leaves the store in primary-only mode. The secondary is
    /// probed once here and never re-probed.
    pub async fn open(
        options: StoreOptions,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        let primary: Arc<dyn StorageBackend> = Arc::new(
            FileBackend::open(options.records_dir, options.primary_quota_bytes).await?,
        );

        let secondary: Option<Arc<dyn StorageBackend>> = match options.sqlite_path {
            Some(path) => match SqliteBackend::open(&path) {
                Ok(backend) => Some(Arc::new(backend)),
                Err(e) => {
                    warn!(
                        "Secondary store unavailable, continuing primary-only: {}",
                        e
                    );
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            primary,
            secondary,
            connectivity,
            metrics: StoreMetrics::new(),
        })
    }

    /// Saves a record. Every failure is folded into the outcome; callers
    /// never see an error they have to catch.
    pub async fn save(&self, key: &str, data: Value) -> SaveOutcome {
        let record = StoredRecord::new(key, data);

        match self.primary.put(&record).await {
            Ok(()) => {
                debug!("Saved record {} to primary", key);
                self.metrics.record_save(BackendKind::Primary);
                SaveOutcome::stored(BackendKind::Primary)
            }
            Err(StoreError::CapacityExceeded { .. }) => self.spill(&record).await,
            Err(e) => {
                warn!("Primary save failed for {}: {}", key, e);
                self.metrics.record_failed_save();
                SaveOutcome::failed(e.to_string())
            }
        }
    }

    /// Spillover path, taken only for quota rejections. The secondary tier
    /// is skipped while offline; the next save after reconnecting retries.
    async fn spill(&self, record: &StoredRecord) -> SaveOutcome {
        let Some(secondary) = &self.secondary else {
            self.metrics.record_failed_save();
            return SaveOutcome::failed("primary capacity exceeded and no secondary tier configured");
        };

        if !self.connectivity.is_online() {
            debug!("Skipping secondary save for {} while offline", record.key);
            self.metrics.record_failed_save();
            return SaveOutcome::failed("primary capacity exceeded; secondary skipped while offline");
        }

        match secondary.put(record).await {
            Ok(()) => {
                debug!(
                    "Saved record {} to secondary after capacity rejection",
                    record.key
                );
                self.metrics.record_save(BackendKind::Secondary);
                SaveOutcome::stored(BackendKind::Secondary)
            }
            Err(e) => {
                warn!("Secondary save failed for {}: {}", record.key, e);
                self.metrics.record_failed_save();
                SaveOutcome::failed(e.to_string())
            }
        }
    }

    /// Loads the payload stored under `key`, trying primary then secondary.
    /// Unreadable records count as absent.
    pub async fn load(&self, key: &str) -> Option<Value> {
        match self.primary.get(key).await {
            Ok(Some(record)) => {
                self.metrics.record_hit(BackendKind::Primary);
                return Some(record.data);
            }
            Ok(None) => {}
            Err(e) => warn!("Primary load failed for {}: {}", key, e),
        }

        if let Some(secondary) = &self.secondary {
            match secondary.get(key).await {
                Ok(Some(record)) => {
                    self.metrics.record_hit(BackendKind::Secondary);
                    return Some(record.data);
                }
                Ok(None) => {}
                Err(e) => warn!("Secondary load failed for {}: {}", key, e),
            }
        }

        self.metrics.record_miss();
        None
    }

    /// Clears one key from both tiers, or everything when `key` is None.
    pub async fn clear(&self, key: Option<&str>) -> ClearOutcome {
        let mut success = true;

        let result = match key {
            Some(k) => self.primary.delete(k).await,
            None => self.primary.clear().await,
        };
        if let Err(e) = result {
            warn!("Primary clear failed: {}", e);
            success = false;
        }

        if let Some(secondary) = &self.secondary {
            let result = match key {
                Some(k) => secondary.delete(k).await,
                None => secondary.clear().await,
            };
            if let Err(e) = result {
                warn!("Secondary clear failed: {}", e);
                success = false;
            }
        }

        ClearOutcome { success }
    }

    /// Byte usage of both tiers. A tier that cannot report counts as zero.
    pub async fn storage_info(&self) -> StorageInfo {
        let primary_bytes = match self.primary.usage_bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Primary usage unavailable: {}", e);
                0
            }
        };

        let secondary_bytes = match &self.secondary {
            Some(secondary) => match secondary.usage_bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Secondary usage unavailable: {}", e);
                    0
                }
            },
            None => 0,
        };

        let total_mb = (primary_bytes + secondary_bytes) as f64 / (1024.0 * 1024.0);

        StorageInfo {
            primary_bytes,
            secondary_bytes,
            total_mb: (total_mb * 100.0).round() / 100.0,
        }
    }

    /// Returns a snapshot of the store counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether the secondary tier survived the startup probe.
    pub fn secondary_available(&self) -> bool {
        self.secondary.is_some()
    }
}
