//! Precache manifest: the resources guaranteed present after install.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::types::{PrecacheError, Result};

/// Declares which paths get pre-cached and which of them serves as the
/// offline fallback document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecacheManifest {
    pub resources: Vec<String>,
    pub offline_document: String,
}

impl PrecacheManifest {
    pub fn new(resources: Vec<String>, offline_document: impl Into<String>) -> Self {
        Self {
            resources,
            offline_document: offline_document.into(),
        }
    }

    /// Reads and validates a manifest from a JSON file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parses and validates manifest JSON.
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: PrecacheManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.resources.is_empty() {
            return Err(PrecacheError::InvalidManifest(
                "resource list is empty".to_string(),
            ));
        }
        if let Some(bad) = self.resources.iter().find(|p| !p.starts_with('/')) {
            return Err(PrecacheError::InvalidManifest(format!(
                "resource path '{bad}' must start with '/'"
            )));
        }
        if !self.resources.contains(&self.offline_document) {
            return Err(PrecacheError::InvalidManifest(format!(
                "offline document '{}' is not in the resource list",
                self.offline_document
            )));
        }
        Ok(())
    }
}
