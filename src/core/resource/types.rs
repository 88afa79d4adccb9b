//! Shared types for the resource cache.

use bytes::Bytes;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while installing or maintaining cached resources.
#[derive(Error, Debug)]
pub enum PrecacheError {
    /// The manifest is structurally unusable.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The configured origin URL cannot be used.
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    /// A resource could not be fetched from the origin or bundle.
    #[error("failed to fetch {path}: {reason}")]
    Fetch { path: String, reason: String },

    /// Installation stopped and discarded its staging area.
    #[error("install aborted: {failed} of {total} resources failed")]
    InstallAborted { failed: usize, total: usize },

    /// The cache worker task is gone; the gateway is shutting down.
    #[error("resource cache worker unavailable")]
    WorkerGone,

    /// I/O error during namespace operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for resource cache operations.
pub type Result<T> = std::result::Result<T, PrecacheError>;

/// What a failed manifest entry does to an installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPolicy {
    /// Any single failure aborts the install and discards the staging area.
    Strict,
    /// Failures are logged and skipped. The install still commits as long
    /// as the offline document itself was cached; otherwise it aborts and
    /// leaves any committed namespace in place.
    BestEffort,
}

impl FromStr for InstallPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strict" => Ok(InstallPolicy::Strict),
            "best-effort" => Ok(InstallPolicy::BestEffort),
            other => Err(format!(
                "Unknown install policy '{other}', expected 'strict' or 'best-effort'"
            )),
        }
    }
}

/// A cached response body plus the metadata needed to replay it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// What a fetcher produced for a path. `cacheable` marks responses the
/// cache may keep: a 200 that did not escape the configured origin.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub cacheable: bool,
}

impl FetchedResource {
    pub fn into_cached(self) -> CachedResponse {
        CachedResponse {
            status: self.status,
            content_type: self.content_type,
            body: self.body,
        }
    }
}

/// Lifecycle of the current cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationPhase {
    /// No namespace exists for this build yet.
    Idle,
    /// A manifest install is writing the staged namespace.
    Installing,
    /// Installed and servable, but prior generations may still exist.
    Waiting,
    /// This generation is the only one on disk.
    Active,
}

/// Summary of a completed installation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub version: String,
    pub cached: usize,
    pub failed: Vec<String>,
}

/// Summary of a completed activation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationReport {
    pub version: String,
    pub removed: Vec<String>,
}

/// Point-in-time view of the cache for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub version: String,
    pub phase: GenerationPhase,
    pub entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_document: Option<String>,
}
