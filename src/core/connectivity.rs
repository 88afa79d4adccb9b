//! Online/offline tracking.
//!
//! A single watch channel holds the current state. In hosted deployments a
//! background probe task is the writer; in embedded deployments the state is
//! pinned online at startup and never changes. "Offline" means the origin is
//! unreachable, not that the host has no network at all.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self { sender }
    }

    /// Current state without subscribing.
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record an observation. Transitions are logged once, repeats are silent.
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|state| {
            if *state != online {
                *state = online;
                true
            } else {
                false
            }
        });
        if changed {
            if online {
                info!("Connectivity restored");
            } else {
                info!("Connectivity lost, running offline");
            }
        }
    }

    /// Watch for transitions. Receivers observe the latest value immediately.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Periodically HEAD the origin and fold the outcome into the state.
    ///
    /// Any HTTP response counts as online, even an error status: the origin
    /// answered, so the link is up. Only transport failures count as offline.
    pub fn spawn_probe(
        self: &Arc<Self>,
        origin_url: String,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            loop {
                let reachable = client
                    .head(&origin_url)
                    .timeout(Duration::from_secs(5))
                    .send()
                    .await
                    .is_ok();
                debug!("Origin probe: reachable={}", reachable);
                monitor.set_online(reachable);
                tokio::time::sleep(interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state_is_visible() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());

        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_transitions_reach_subscribers() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_repeated_observations_do_not_notify() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();
        rx.mark_unchanged();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());
        assert!(monitor.is_online());
    }
}
