//! Core offline-resilience services.
//!
//! This module contains the domain logic behind the HTTP surface:
//! - `connectivity`: Online/offline state shared across the process
//! - `lifecycle`: Activation control and readiness broadcasts
//! - `resource`: Versioned resource cache with staged installs
//! - `store`: Tiered durable record store

pub mod connectivity;
pub mod lifecycle;
pub mod resource;
pub mod store;

pub use connectivity::ConnectivityMonitor;
pub use lifecycle::{LifecycleController, LifecycleEvent};
pub use resource::{BundleFetcher, OriginFetcher, ResourceCache, ResourceFetcher};
pub use store::{DurableStore, StoreOptions};
