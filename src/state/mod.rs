use std::sync::Arc;
use std::time::Duration;

use crate::config::{DeploymentMode, ServerConfig};
use crate::core::connectivity::ConnectivityMonitor;
use crate::core::lifecycle::LifecycleController;
use crate::core::resource::{
    BundleFetcher, NamespaceStore, OriginFetcher, ResourceCache, ResourceFetcher,
};
use crate::core::store::{DurableStore, StoreOptions};

/// Application state that can be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    /// Online/offline state, fed by origin probing in hosted mode
    pub connectivity: Arc<ConnectivityMonitor>,
    /// Tiered durable record store
    pub store: Arc<DurableStore>,
    /// Handle to the resource cache worker
    pub cache: ResourceCache,
    /// Handle to the lifecycle worker
    pub lifecycle: LifecycleController,
    /// Where cache misses and forwards go
    pub fetcher: Arc<dyn ResourceFetcher>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        // Embedded deployments read from disk and count as always online.
        let connectivity = Arc::new(ConnectivityMonitor::new(true));

        let fetcher: Arc<dyn ResourceFetcher> = match config.deployment {
            DeploymentMode::Hosted => {
                let origin = config
                    .origin_url
                    .clone()
                    .ok_or("ORIGIN_URL is required in hosted mode")?;
                connectivity.spawn_probe(
                    origin.clone(),
                    Duration::from_secs(config.probe_interval_secs),
                );
                Arc::new(OriginFetcher::new(&origin)?)
            }
            DeploymentMode::Embedded => {
                let bundle = config
                    .bundle_dir
                    .clone()
                    .ok_or("BUNDLE_DIR is required in embedded mode")?;
                Arc::new(BundleFetcher::new(bundle))
            }
        };

        let store = Arc::new(
            DurableStore::open(
                StoreOptions {
                    records_dir: config.records_dir(),
                    primary_quota_bytes: config.primary_quota_bytes,
                    sqlite_path: config.secondary_enabled.then(|| config.sqlite_path()),
                },
                connectivity.clone(),
            )
            .await?,
        );

        let namespace_store = NamespaceStore::new(
            config.resources_dir(),
            config.namespace_prefix.clone(),
            config.asset_version.clone(),
        );
        let cache = ResourceCache::spawn(
            namespace_store,
            fetcher.clone(),
            config.hot_cache_entries,
        );
        let lifecycle = LifecycleController::spawn(cache.clone(), config.asset_version.clone());

        Ok(Arc::new(Self {
            config,
            connectivity,
            store,
            cache,
            lifecycle,
            fetcher,
        }))
    }
}
