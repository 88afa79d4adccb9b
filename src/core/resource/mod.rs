//! Versioned resource cache.
//!
//! This module provides offline-first serving of static resources:
//! - `manifest`: Precache manifest parsing and validation
//! - `namespace`: On-disk versioned namespaces with staged installs
//! - `manager`: The cache worker task and its handle
//! - `fetcher`: Origin and bundle resource acquisition
//! - `strategy`: Request classification and cache/network ordering
//! - `types`: Shared types and errors

pub mod fetcher;
pub mod manager;
pub mod manifest;
pub mod namespace;
pub mod strategy;
pub mod types;

pub use fetcher::{BundleFetcher, ForwardedResponse, OriginFetcher, ResourceFetcher};
pub use manager::ResourceCache;
pub use manifest::PrecacheManifest;
pub use namespace::{NamespaceMetadata, NamespaceStore};
pub use strategy::{
    classify, is_image_request, RequestClass, ServeStrategy, StrategyTable, OFFLINE_IMAGE_SVG,
    OFFLINE_NOTICE,
};
pub use types::{
    ActivationReport, CacheStatus, CachedResponse, FetchedResource, GenerationPhase,
    InstallPolicy, InstallReport, PrecacheError,
};
