//! On-disk layout for versioned response namespaces.
//!
//! Each generation lives under `<root>/<prefix><version>/`. Installs write
//! into a sibling `<name>.staging/` directory and rename it into place, so a
//! namespace is never visible half-written. Entries are sharded by key hash
//! with a JSON sidecar next to each body file.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_128;

use super::types::{CachedResponse, Result};

const METADATA_FILE: &str = "namespace.json";
const STAGING_SUFFIX: &str = ".staging";

/// Identity card written at install commit time and read back at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceMetadata {
    pub version: String,
    pub offline_document: String,
    pub installed_at: DateTime<Utc>,
}

/// Sidecar describing one cached entry.
#[derive(Serialize, Deserialize)]
struct EntryMeta {
    path: String,
    status: u16,
    content_type: Option<String>,
    fetched_at: DateTime<Utc>,
}

/// Filesystem store for the current build's namespace.
pub struct NamespaceStore {
    root: PathBuf,
    prefix: String,
    version: String,
}

impl NamespaceStore {
    pub fn new(root: PathBuf, prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            root,
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    /// Name of the namespace for the running build, `<prefix><version>`.
    pub fn current_name(&self) -> String {
        format!("{}{}", self.prefix, self.version)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn live_dir(&self) -> PathBuf {
        self.root.join(self.current_name())
    }

    fn staging_dir(&self) -> PathBuf {
        self.root
            .join(format!("{}{}", self.current_name(), STAGING_SUFFIX))
    }

    fn entry_paths(base: &Path, request_path: &str) -> (PathBuf, PathBuf) {
        let hash = format!("{:032x}", xxh3_128(request_path.as_bytes()));
        let shard = base.join(&hash[0..2]);
        (
            shard.join(format!("{hash}.bin")),
            shard.join(format!("{hash}.meta")),
        )
    }

    async fn write_entry(base: &Path, request_path: &str, response: &CachedResponse) -> Result<()> {
        let (body_path, meta_path) = Self::entry_paths(base, request_path);

        if let Some(parent) = body_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write using temp file
        let temp_path = body_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&response.body).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &body_path).await?;

        let meta = EntryMeta {
            path: request_path.to_string(),
            status: response.status,
            content_type: response.content_type.clone(),
            fetched_at: Utc::now(),
        };

        let meta_json = serde_json::to_vec(&meta)?;
        let temp_meta_path = meta_path.with_extension("tmp");
        let mut meta_file = fs::File::create(&temp_meta_path).await?;
        meta_file.write_all(&meta_json).await?;
        meta_file.sync_all().await?;
        drop(meta_file);

        fs::rename(&temp_meta_path, &meta_path).await?;

        Ok(())
    }

    /// Begins a staged install, discarding any staging leftovers.
    pub async fn begin_staging(&self) -> Result<()> {
        let staging = self.staging_dir();
        let _ = fs::remove_dir_all(&staging).await;
        fs::create_dir_all(&staging).await?;
        Ok(())
    }

    /// Writes an entry into the staged namespace.
    pub async fn stage_entry(&self, request_path: &str, response: &CachedResponse) -> Result<()> {
        Self::write_entry(&self.staging_dir(), request_path, response).await
    }

    /// Stamps the staged namespace with its identity card.
    pub async fn stage_metadata(&self, metadata: &NamespaceMetadata) -> Result<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        fs::write(self.staging_dir().join(METADATA_FILE), json).await?;
        Ok(())
    }

    /// Replaces the live namespace with the staged one.
    pub async fn commit_staging(&self) -> Result<()> {
        let live = self.live_dir();
        let _ = fs::remove_dir_all(&live).await;
        fs::rename(self.staging_dir(), &live).await?;
        debug!("Namespace {} committed", self.current_name());
        Ok(())
    }

    /// Throws away a staged install.
    pub async fn abort_staging(&self) {
        let _ = fs::remove_dir_all(self.staging_dir()).await;
    }

    /// Looks up an entry in the live namespace.
    pub async fn get(&self, request_path: &str) -> Result<Option<CachedResponse>> {
        let (body_path, meta_path) = Self::entry_paths(&self.live_dir(), request_path);

        let meta_data = match fs::read(&meta_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EntryMeta = serde_json::from_slice(&meta_data)?;

        match fs::read(&body_path).await {
            Ok(data) => Ok(Some(CachedResponse {
                status: meta.status,
                content_type: meta.content_type,
                body: Bytes::from(data),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Orphaned sidecar; drop it so the entry reads as absent.
                let _ = fs::remove_file(&meta_path).await;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes an entry into the live namespace. Used by background refreshes
    /// and runtime caching of misses.
    pub async fn put(&self, request_path: &str, response: &CachedResponse) -> Result<()> {
        Self::write_entry(&self.live_dir(), request_path, response).await
    }

    /// Reads the live namespace's identity card, if one exists.
    pub async fn read_metadata(&self) -> Option<NamespaceMetadata> {
        let data = fs::read(self.live_dir().join(METADATA_FILE)).await.ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Every namespace directory under the root, staging leftovers included.
    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry.metadata().await?.is_dir();
            if is_dir && let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Deletes every namespace whose name differs from the current one,
    /// returning the removed names.
    pub async fn delete_stale(&self) -> Result<Vec<String>> {
        let current = self.current_name();
        let mut removed = Vec::new();

        for name in self.list_namespaces().await? {
            if name != current {
                warn!("Deleting stale namespace {}", name);
                fs::remove_dir_all(self.root.join(&name)).await?;
                removed.push(name);
            }
        }

        Ok(removed)
    }

    /// Number of entries in the live namespace.
    pub async fn entry_count(&self) -> usize {
        let mut count = 0;

        let Ok(mut shards) = fs::read_dir(self.live_dir()).await else {
            return 0;
        };
        while let Ok(Some(shard)) = shards.next_entry().await {
            let Ok(meta) = shard.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let Ok(mut entries) = fs::read_dir(shard.path()).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.path().extension().is_some_and(|ext| ext == "meta") {
                    count += 1;
                }
            }
        }

        count
    }
}
