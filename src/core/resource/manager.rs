//! Resource cache worker and its handle.
//!
//! All generation state (phase, namespace directories, hot cache) is owned
//! by a single task. Handles talk to it over a channel, so installs,
//! lookups and activation are serialized and never race.

use moka::future::Cache;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::fetcher::ResourceFetcher;
use super::manifest::PrecacheManifest;
use super::namespace::{NamespaceMetadata, NamespaceStore};
use super::types::{
    ActivationReport, CacheStatus, CachedResponse, GenerationPhase, InstallPolicy, InstallReport,
    PrecacheError, Result,
};

const COMMAND_BUFFER: usize = 1024;

enum CacheCommand {
    Install {
        manifest: PrecacheManifest,
        policy: InstallPolicy,
        response_tx: oneshot::Sender<Result<InstallReport>>,
    },
    Activate {
        response_tx: oneshot::Sender<Result<ActivationReport>>,
    },
    Lookup {
        path: String,
        response_tx: oneshot::Sender<Option<CachedResponse>>,
    },
    Store {
        path: String,
        response: CachedResponse,
    },
    Status {
        response_tx: oneshot::Sender<CacheStatus>,
    },
}

/// Cloneable handle to the cache worker.
#[derive(Clone)]
pub struct ResourceCache {
    sender: mpsc::Sender<CacheCommand>,
}

impl ResourceCache {
    /// Spawns the worker task and returns a handle to it.
    pub fn spawn(
        store: NamespaceStore,
        fetcher: Arc<dyn ResourceFetcher>,
        hot_capacity: u64,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run_cache_worker(receiver, store, fetcher, hot_capacity));
        Self { sender }
    }

    /// Stages and commits a new namespace from the manifest.
    pub async fn install(
        &self,
        manifest: PrecacheManifest,
        policy: InstallPolicy,
    ) -> Result<InstallReport> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(CacheCommand::Install {
                manifest,
                policy,
                response_tx,
            })
            .await
            .map_err(|_| PrecacheError::WorkerGone)?;
        response_rx.await.map_err(|_| PrecacheError::WorkerGone)?
    }

    /// Takes the installed namespace live and deletes stale ones.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(CacheCommand::Activate { response_tx })
            .await
            .map_err(|_| PrecacheError::WorkerGone)?;
        response_rx.await.map_err(|_| PrecacheError::WorkerGone)?
    }

    /// Cache lookup. A dead worker reads as a miss.
    pub async fn lookup(&self, path: &str) -> Option<CachedResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(CacheCommand::Lookup {
                path: path.to_string(),
                response_tx,
            })
            .await
            .ok()?;
        response_rx.await.ok()?
    }

    /// Fire-and-forget write into the live namespace.
    pub async fn store_entry(&self, path: String, response: CachedResponse) {
        let _ = self
            .sender
            .send(CacheCommand::Store { path, response })
            .await;
    }

    pub async fn status(&self) -> Result<CacheStatus> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(CacheCommand::Status { response_tx })
            .await
            .map_err(|_| PrecacheError::WorkerGone)?;
        response_rx.await.map_err(|_| PrecacheError::WorkerGone)
    }
}

struct CacheWorker {
    store: NamespaceStore,
    fetcher: Arc<dyn ResourceFetcher>,
    hot: Cache<String, CachedResponse>,
    phase: GenerationPhase,
    metadata: Option<NamespaceMetadata>,
}

async fn run_cache_worker(
    mut receiver: mpsc::Receiver<CacheCommand>,
    store: NamespaceStore,
    fetcher: Arc<dyn ResourceFetcher>,
    hot_capacity: u64,
) {
    // A committed namespace for this exact version survives restarts; it
    // stays in the waiting phase until something activates it.
    let metadata = store.read_metadata().await;
    let phase = if metadata.is_some() {
        info!("Namespace {} already installed", store.current_name());
        GenerationPhase::Waiting
    } else {
        GenerationPhase::Idle
    };

    let mut worker = CacheWorker {
        store,
        fetcher,
        hot: Cache::builder().max_capacity(hot_capacity).build(),
        phase,
        metadata,
    };

    info!("Resource cache worker started");

    while let Some(command) = receiver.recv().await {
        match command {
            CacheCommand::Install {
                manifest,
                policy,
                response_tx,
            } => {
                let result = worker.install(&manifest, policy).await;
                let _ = response_tx.send(result);
            }
            CacheCommand::Activate { response_tx } => {
                let result = worker.activate().await;
                let _ = response_tx.send(result);
            }
            CacheCommand::Lookup { path, response_tx } => {
                let _ = response_tx.send(worker.lookup(&path).await);
            }
            CacheCommand::Store { path, response } => {
                worker.store_entry(path, response).await;
            }
            CacheCommand::Status { response_tx } => {
                let _ = response_tx.send(worker.status().await);
            }
        }
    }

    info!("Resource cache worker stopped");
}

impl CacheWorker {
    async fn install(
        &mut self,
        manifest: &PrecacheManifest,
        policy: InstallPolicy,
    ) -> Result<InstallReport> {
        let prior = self.phase;
        self.phase = GenerationPhase::Installing;

        match self.run_install(manifest, policy).await {
            Ok(report) => {
                self.phase = GenerationPhase::Waiting;
                self.hot.invalidate_all();
                info!(
                    "Namespace {} installed: {} cached, {} failed",
                    self.store.current_name(),
                    report.cached,
                    report.failed.len()
                );
                Ok(report)
            }
            Err(e) => {
                self.store.abort_staging().await;
                self.phase = prior;
                Err(e)
            }
        }
    }

    async fn run_install(
        &mut self,
        manifest: &PrecacheManifest,
        policy: InstallPolicy,
    ) -> Result<InstallReport> {
        let total = manifest.resources.len();
        info!(
            "Installing namespace {} ({} resources)",
            self.store.current_name(),
            total
        );
        self.store.begin_staging().await?;

        let mut cached = 0;
        let mut failed = Vec::new();
        for path in &manifest.resources {
            match self.fetcher.fetch(path).await {
                Ok(resource) if resource.status == 200 && resource.cacheable => {
                    self.store.stage_entry(path, &resource.into_cached()).await?;
                    cached += 1;
                }
                Ok(resource) => {
                    warn!("Precache of {} got status {}", path, resource.status);
                    failed.push(path.clone());
                }
                Err(e) => {
                    warn!("Precache of {} failed: {}", path, e);
                    failed.push(path.clone());
                }
            }
        }

        if !failed.is_empty() && policy == InstallPolicy::Strict {
            return Err(PrecacheError::InstallAborted {
                failed: failed.len(),
                total,
            });
        }
        // An install that cached nothing, or that missed its offline
        // document, must not replace a committed namespace.
        if cached == 0 || failed.contains(&manifest.offline_document) {
            warn!(
                "Namespace {} staged without its offline document ({} of {} cached), aborting",
                self.store.current_name(),
                cached,
                total
            );
            return Err(PrecacheError::InstallAborted {
                failed: failed.len(),
                total,
            });
        }

        let metadata = NamespaceMetadata {
            version: self.store.version().to_string(),
            offline_document: manifest.offline_document.clone(),
            installed_at: chrono::Utc::now(),
        };
        self.store.stage_metadata(&metadata).await?;
        self.store.commit_staging().await?;

        let version = metadata.version.clone();
        self.metadata = Some(metadata);

        Ok(InstallReport {
            version,
            cached,
            failed,
        })
    }

    async fn activate(&mut self) -> Result<ActivationReport> {
        let removed = self.store.delete_stale().await?;
        self.phase = GenerationPhase::Active;
        self.hot.invalidate_all();
        info!(
            "Namespace {} activated, {} stale namespaces removed",
            self.store.current_name(),
            removed.len()
        );
        Ok(ActivationReport {
            version: self.store.version().to_string(),
            removed,
        })
    }

    async fn lookup(&self, path: &str) -> Option<CachedResponse> {
        if let Some(hit) = self.hot.get(path).await {
            return Some(hit);
        }

        match self.store.get(path).await {
            Ok(Some(response)) => {
                self.hot
                    .insert(path.to_string(), response.clone())
                    .await;
                Some(response)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read for {} failed: {}", path, e);
                None
            }
        }
    }

    async fn store_entry(&self, path: String, response: CachedResponse) {
        if let Err(e) = self.store.put(&path, &response).await {
            warn!("Cache write for {} failed: {}", path, e);
            return;
        }
        self.hot.insert(path, response).await;
    }

    async fn status(&self) -> CacheStatus {
        CacheStatus {
            version: self.store.version().to_string(),
            phase: self.phase,
            entries: self.store.entry_count().await,
            offline_document: self
                .metadata
                .as_ref()
                .map(|m| m.offline_document.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use reqwest::header::HeaderMap;
    use reqwest::Method;
    use std::collections::HashMap;
    use tempfile::TempDir;

    use crate::core::resource::fetcher::ForwardedResponse;
    use crate::core::resource::types::FetchedResource;

    /// Serves canned responses and records which paths were fetched.
    struct FakeOrigin {
        responses: HashMap<String, FetchedResource>,
        fetched: Mutex<Vec<String>>,
    }

    impl FakeOrigin {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn with_page(mut self, path: &str, body: &str) -> Self {
            self.responses.insert(
                path.to_string(),
                FetchedResource {
                    status: 200,
                    content_type: Some("text/html; charset=utf-8".to_string()),
                    body: Bytes::from(body.to_string()),
                    cacheable: true,
                },
            );
            self
        }
    }

    #[async_trait]
    impl ResourceFetcher for FakeOrigin {
        async fn fetch(&self, path: &str) -> Result<FetchedResource> {
            self.fetched.lock().push(path.to_string());
            match self.responses.get(path) {
                Some(resource) => Ok(resource.clone()),
                None => Ok(FetchedResource {
                    status: 404,
                    content_type: None,
                    body: Bytes::new(),
                    cacheable: false,
                }),
            }
        }

        async fn forward(
            &self,
            _method: Method,
            path: &str,
            _headers: HeaderMap,
            _body: Bytes,
        ) -> Result<ForwardedResponse> {
            Err(PrecacheError::Fetch {
                path: path.to_string(),
                reason: "not supported in tests".to_string(),
            })
        }
    }

    /// Fails every request, standing in for an unreachable origin.
    struct DeadOrigin;

    #[async_trait]
    impl ResourceFetcher for DeadOrigin {
        async fn fetch(&self, path: &str) -> Result<FetchedResource> {
            Err(PrecacheError::Fetch {
                path: path.to_string(),
                reason: "connection refused".to_string(),
            })
        }

        async fn forward(
            &self,
            _method: Method,
            path: &str,
            _headers: HeaderMap,
            _body: Bytes,
        ) -> Result<ForwardedResponse> {
            Err(PrecacheError::Fetch {
                path: path.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn manifest(paths: &[&str], offline: &str) -> PrecacheManifest {
        PrecacheManifest {
            resources: paths.iter().map(|p| p.to_string()).collect(),
            offline_document: offline.to_string(),
        }
    }

    fn cache_with(
        temp_dir: &TempDir,
        version: &str,
        origin: Arc<dyn ResourceFetcher>,
    ) -> ResourceCache {
        let store = NamespaceStore::new(temp_dir.path().to_path_buf(), "static-", version);
        ResourceCache::spawn(store, origin, 32)
    }

    #[tokio::test]
    async fn test_install_caches_manifest_resources() {
        let temp_dir = TempDir::new().unwrap();
        let origin = Arc::new(
            FakeOrigin::new()
                .with_page("/", "<h1>home</h1>")
                .with_page("/offline.html", "<h1>offline</h1>"),
        );
        let cache = cache_with(&temp_dir, "1.0.0", origin.clone());

        let report = cache
            .install(
                manifest(&["/", "/offline.html"], "/offline.html"),
                InstallPolicy::Strict,
            )
            .await
            .unwrap();

        assert_eq!(report.version, "1.0.0");
        assert_eq!(report.cached, 2);
        assert!(report.failed.is_empty());
        assert_eq!(
            *origin.fetched.lock(),
            vec!["/".to_string(), "/offline.html".to_string()]
        );

        let hit = cache.lookup("/").await.unwrap();
        assert_eq!(hit.body, Bytes::from("<h1>home</h1>"));

        let status = cache.status().await.unwrap();
        assert_eq!(status.phase, GenerationPhase::Waiting);
        assert_eq!(status.entries, 2);
        assert_eq!(status.offline_document.as_deref(), Some("/offline.html"));
    }

    #[tokio::test]
    async fn test_strict_install_aborts_on_missing_resource() {
        let temp_dir = TempDir::new().unwrap();
        let origin = Arc::new(FakeOrigin::new().with_page("/", "<h1>home</h1>"));
        let cache = cache_with(&temp_dir, "1.0.0", origin);

        let result = cache
            .install(manifest(&["/", "/gone.css"], "/"), InstallPolicy::Strict)
            .await;

        assert!(matches!(
            result,
            Err(PrecacheError::InstallAborted { failed: 1, total: 2 })
        ));

        // Nothing from the aborted install is visible.
        assert!(cache.lookup("/").await.is_none());
        let status = cache.status().await.unwrap();
        assert_eq!(status.phase, GenerationPhase::Idle);
        assert_eq!(status.entries, 0);
    }

    #[tokio::test]
    async fn test_best_effort_install_keeps_partial_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let origin = Arc::new(FakeOrigin::new().with_page("/", "<h1>home</h1>"));
        let cache = cache_with(&temp_dir, "1.0.0", origin);

        let report = cache
            .install(manifest(&["/", "/gone.css"], "/"), InstallPolicy::BestEffort)
            .await
            .unwrap();

        assert_eq!(report.cached, 1);
        assert_eq!(report.failed, vec!["/gone.css".to_string()]);
        assert!(cache.lookup("/").await.is_some());
        assert!(cache.lookup("/gone.css").await.is_none());
    }

    #[tokio::test]
    async fn test_best_effort_install_requires_offline_document() {
        let temp_dir = TempDir::new().unwrap();
        let origin = Arc::new(FakeOrigin::new().with_page("/", "<h1>home</h1>"));
        let cache = cache_with(&temp_dir, "1.0.0", origin);

        let result = cache
            .install(
                manifest(&["/", "/offline.html"], "/offline.html"),
                InstallPolicy::BestEffort,
            )
            .await;

        assert!(matches!(
            result,
            Err(PrecacheError::InstallAborted { failed: 1, total: 2 })
        ));
        assert!(cache.lookup("/").await.is_none());
        let status = cache.status().await.unwrap();
        assert_eq!(status.phase, GenerationPhase::Idle);
    }

    #[tokio::test]
    async fn test_offline_reinstall_preserves_committed_namespace() {
        let temp_dir = TempDir::new().unwrap();

        let origin = Arc::new(
            FakeOrigin::new()
                .with_page("/app.js", "console.log(1)")
                .with_page("/offline.html", "<h1>offline</h1>"),
        );
        let cache = cache_with(&temp_dir, "1.0.0", origin);
        let report = cache
            .install(
                manifest(&["/app.js", "/offline.html"], "/offline.html"),
                InstallPolicy::BestEffort,
            )
            .await
            .unwrap();
        assert_eq!(report.cached, 2);
        drop(cache);

        // Reboot with the origin unreachable. The reinstall fails and the
        // namespace committed by the previous run keeps serving.
        let rebooted = cache_with(&temp_dir, "1.0.0", Arc::new(DeadOrigin));
        let result = rebooted
            .install(
                manifest(&["/app.js", "/offline.html"], "/offline.html"),
                InstallPolicy::BestEffort,
            )
            .await;
        assert!(matches!(
            result,
            Err(PrecacheError::InstallAborted { failed: 2, total: 2 })
        ));

        let hit = rebooted.lookup("/app.js").await.unwrap();
        assert_eq!(hit.body, Bytes::from("console.log(1)"));
        let status = rebooted.status().await.unwrap();
        assert_eq!(status.phase, GenerationPhase::Waiting);
        assert_eq!(status.entries, 2);
    }

    #[tokio::test]
    async fn test_activation_removes_stale_namespaces() {
        let temp_dir = TempDir::new().unwrap();

        // A previous build left its namespace behind.
        let old = NamespaceStore::new(temp_dir.path().to_path_buf(), "static-", "0.9.0");
        old.put(
            "/",
            &CachedResponse {
                status: 200,
                content_type: None,
                body: Bytes::from_static(b"old"),
            },
        )
        .await
        .unwrap();

        let origin = Arc::new(FakeOrigin::new().with_page("/", "<h1>new</h1>"));
        let cache = cache_with(&temp_dir, "1.0.0", origin);
        cache
            .install(manifest(&["/"], "/"), InstallPolicy::Strict)
            .await
            .unwrap();

        let report = cache.activate().await.unwrap();
        assert_eq!(report.version, "1.0.0");
        assert_eq!(report.removed, vec!["static-0.9.0".to_string()]);

        let status = cache.status().await.unwrap();
        assert_eq!(status.phase, GenerationPhase::Active);
    }

    #[tokio::test]
    async fn test_runtime_store_and_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let cache = cache_with(&temp_dir, "1.0.0", Arc::new(FakeOrigin::new()));

        let response = CachedResponse {
            status: 200,
            content_type: Some("text/css".to_string()),
            body: Bytes::from_static(b"body{}"),
        };
        cache.store_entry("/late.css".to_string(), response.clone()).await;

        // The worker processes commands in order, so the lookup sees the write.
        let hit = cache.lookup("/late.css").await.unwrap();
        assert_eq!(hit, response);
    }

    #[tokio::test]
    async fn test_committed_namespace_found_after_restart() {
        let temp_dir = TempDir::new().unwrap();

        let origin = Arc::new(FakeOrigin::new().with_page("/", "<h1>home</h1>"));
        let cache = cache_with(&temp_dir, "1.0.0", origin);
        cache
            .install(manifest(&["/"], "/"), InstallPolicy::Strict)
            .await
            .unwrap();
        drop(cache);

        // A fresh worker over the same directory picks the namespace up.
        let restarted = cache_with(&temp_dir, "1.0.0", Arc::new(FakeOrigin::new()));
        let status = restarted.status().await.unwrap();
        assert_eq!(status.phase, GenerationPhase::Waiting);
        assert_eq!(status.offline_document.as_deref(), Some("/"));
        assert!(restarted.lookup("/").await.is_some());
    }
}
