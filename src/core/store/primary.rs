//! Primary tier: one JSON file per record under a byte quota.
//!
//! This models the small, fast store the gateway fills first. Usage is
//! tracked in memory and seeded by scanning the directory at open, so the
//! figure survives restarts without an index file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_128;

use super::backend::{BackendKind, Result, StorageBackend, StoreError};
use super::record::StoredRecord;

/// Filesystem-backed primary store with a byte quota.
pub struct FileBackend {
    dir: PathBuf,
    quota_bytes: u64,
    used_bytes: AtomicU64,
}

impl FileBackend {
    /// Opens the backend, creating `dir` if needed and scanning it to seed
    /// the usage counter.
    pub async fn open(dir: PathBuf, quota_bytes: u64) -> Result<Self> {
        fs::create_dir_all(&dir).await?;

        let mut used = 0u64;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                used += meta.len();
            }
        }

        debug!(
            "Primary store opened at {:?} ({} of {} bytes used)",
            dir, used, quota_bytes
        );

        Ok(Self {
            dir,
            quota_bytes,
            used_bytes: AtomicU64::new(used),
        })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        let hash = format!("{:032x}", xxh3_128(key.as_bytes()));
        self.dir.join(format!("{hash}.json"))
    }

    async fn existing_len(&self, path: &Path) -> u64 {
        match fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        }
    }

    fn shrink_usage(&self, bytes: u64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn put(&self, record: &StoredRecord) -> Result<()> {
        let path = self.record_path(&record.key);
        let encoded = serde_json::to_vec(record)?;
        let new_len = encoded.len() as u64;
        let old_len = self.existing_len(&path).await;

        // Concurrent writers may each pass this check before either write
        // lands, so the quota is approximate, not a hard ceiling.
        let used = self.used_bytes.load(Ordering::Acquire);
        if used.saturating_sub(old_len) + new_len > self.quota_bytes {
            return Err(StoreError::CapacityExceeded {
                needed: new_len,
                quota: self.quota_bytes,
            });
        }

        // Atomic write using temp file
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&encoded).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;

        if new_len >= old_len {
            self.used_bytes
                .fetch_add(new_len - old_len, Ordering::AcqRel);
        } else {
            self.shrink_usage(old_len - new_len);
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let path = self.record_path(key);

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: StoredRecord = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))?;
        Ok(Some(record))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.record_path(key);
        let old_len = self.existing_len(&path).await;

        match fs::remove_file(&path).await {
            Ok(()) => {
                self.shrink_usage(old_len);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        warn!("Clearing primary record store at {:?}", self.dir);
        let _ = fs::remove_dir_all(&self.dir).await;
        fs::create_dir_all(&self.dir).await?;
        self.used_bytes.store(0, Ordering::Release);
        Ok(())
    }

    async fn usage_bytes(&self) -> Result<u64> {
        Ok(self.used_bytes.load(Ordering::Acquire))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Primary
    }
}
