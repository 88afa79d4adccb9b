//! Lifecycle controller for the resource cache.
//!
//! Activation requests from the control channel and from startup all funnel
//! through one worker task, which drives the cache and broadcasts readiness
//! to every connected control client.

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use super::resource::types::{ActivationReport, PrecacheError, Result};
use super::resource::ResourceCache;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 16;

/// Broadcast to control clients when the cache generation changes state.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// The installed namespace went live.
    Ready { version: String },
}

enum LifecycleCommand {
    Activate {
        response_tx: oneshot::Sender<Result<ActivationReport>>,
    },
    Ping {
        response_tx: oneshot::Sender<String>,
    },
}

/// Cloneable handle to the lifecycle worker.
#[derive(Clone)]
pub struct LifecycleController {
    sender: mpsc::Sender<LifecycleCommand>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleController {
    pub fn spawn(cache: ResourceCache, version: String) -> Self {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        tokio::spawn(run_lifecycle_worker(
            receiver,
            cache,
            version,
            events.clone(),
        ));
        Self { sender, events }
    }

    /// Takes the installed namespace live and announces it.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(LifecycleCommand::Activate { response_tx })
            .await
            .map_err(|_| PrecacheError::WorkerGone)?;
        response_rx.await.map_err(|_| PrecacheError::WorkerGone)?
    }

    /// Immediate activation requested by a control client. The waiting
    /// phase exists only until someone asks, so this is activate by
    /// another name.
    pub async fn skip_waiting(&self) -> Result<ActivationReport> {
        self.activate().await
    }

    /// Liveness check; answers with the running build version.
    pub async fn ping(&self) -> Result<String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(LifecycleCommand::Ping { response_tx })
            .await
            .map_err(|_| PrecacheError::WorkerGone)?;
        response_rx.await.map_err(|_| PrecacheError::WorkerGone)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}

async fn run_lifecycle_worker(
    mut receiver: mpsc::Receiver<LifecycleCommand>,
    cache: ResourceCache,
    version: String,
    events: broadcast::Sender<LifecycleEvent>,
) {
    info!("Lifecycle worker started");

    while let Some(command) = receiver.recv().await {
        match command {
            LifecycleCommand::Activate { response_tx } => {
                let result = cache.activate().await;
                if let Ok(report) = &result {
                    // No receivers is fine; nobody is on the control channel.
                    let _ = events.send(LifecycleEvent::Ready {
                        version: report.version.clone(),
                    });
                }
                let _ = response_tx.send(result);
            }
            LifecycleCommand::Ping { response_tx } => {
                let _ = response_tx.send(version.clone());
            }
        }
    }

    info!("Lifecycle worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::types::FetchedResource;
    use crate::core::resource::{ForwardedResponse, NamespaceStore, ResourceFetcher};
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use reqwest::Method;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct NullFetcher;

    #[async_trait]
    impl ResourceFetcher for NullFetcher {
        async fn fetch(&self, _path: &str) -> Result<FetchedResource> {
            Ok(FetchedResource {
                status: 404,
                content_type: None,
                body: Bytes::new(),
                cacheable: false,
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
                reason: "not supported in tests".to_string(),
            })
        }
    }

    fn controller(temp_dir: &TempDir) -> LifecycleController {
        let store = NamespaceStore::new(temp_dir.path().to_path_buf(), "static-", "1.2.3");
        let cache = ResourceCache::spawn(store, Arc::new(NullFetcher), 8);
        LifecycleController::spawn(cache, "1.2.3".to_string())
    }

    #[tokio::test]
    async fn test_ping_answers_with_version() {
        let temp_dir = TempDir::new().unwrap();
        let lifecycle = controller(&temp_dir);

        assert_eq!(lifecycle.ping().await.unwrap(), "1.2.3");
    }

    #[tokio::test]
    async fn test_skip_waiting_activates_and_broadcasts() {
        let temp_dir = TempDir::new().unwrap();
        let lifecycle = controller(&temp_dir);
        let mut events = lifecycle.subscribe();

        let report = lifecycle.skip_waiting().await.unwrap();
        assert_eq!(report.version, "1.2.3");

        let LifecycleEvent::Ready { version } = events.recv().await.unwrap();
        assert_eq!(version, "1.2.3");
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_ready() {
        let temp_dir = TempDir::new().unwrap();
        let lifecycle = controller(&temp_dir);
        let mut first = lifecycle.subscribe();
        let mut second = lifecycle.subscribe();

        lifecycle.activate().await.unwrap();

        assert!(matches!(
            first.recv().await.unwrap(),
            LifecycleEvent::Ready { .. }
        ));
        assert!(matches!(
            second.recv().await.unwrap(),
            LifecycleEvent::Ready { .. }
        ));
    }
}
