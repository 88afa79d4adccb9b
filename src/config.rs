use std::env;
use std::path::PathBuf;

use crate::core::resource::{InstallPolicy, StrategyTable};

/// Where the gateway gets resources it has not cached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Fronting a remote origin server; misses are fetched over HTTP.
    Hosted,
    /// Serving a local asset bundle; the network is never consulted.
    Embedded,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    // Resource acquisition
    pub deployment: DeploymentMode,
    pub origin_url: Option<String>,  // required in hosted mode
    pub bundle_dir: Option<PathBuf>, // required in embedded mode

    // Versioned resource cache
    pub asset_version: String,
    pub namespace_prefix: String,
    pub manifest_path: Option<PathBuf>, // if None, no precache install at startup
    pub install_policy: InstallPolicy,
    pub activate_on_startup: bool,
    pub strategies: StrategyTable,
    pub revalidate_assets: bool,
    pub hot_cache_entries: u64,

    // Durable record store
    pub data_dir: PathBuf,
    pub primary_quota_bytes: u64,
    pub secondary_enabled: bool,

    // Connectivity probing
    pub probe_interval_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8780".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let deployment = parse_deployment(
            &env::var("DEPLOYMENT_MODE").unwrap_or_else(|_| "hosted".to_string()),
        )?;
        let origin_url = env::var("ORIGIN_URL")
            .ok()
            .map(|url| url.trim_end_matches('/').to_string());
        let bundle_dir = env::var("BUNDLE_DIR").ok().map(PathBuf::from);

        match deployment {
            DeploymentMode::Hosted if origin_url.is_none() => {
                return Err("ORIGIN_URL is required when DEPLOYMENT_MODE is 'hosted'".into());
            }
            DeploymentMode::Embedded if bundle_dir.is_none() => {
                return Err("BUNDLE_DIR is required when DEPLOYMENT_MODE is 'embedded'".into());
            }
            _ => {}
        }

        // Resource cache configuration from env
        let asset_version =
            env::var("ASSET_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());
        let namespace_prefix = env::var("CACHE_PREFIX").unwrap_or_else(|_| "static-".to_string());
        let manifest_path = env::var("MANIFEST_PATH").ok().map(PathBuf::from);
        let install_policy = env::var("INSTALL_POLICY")
            .unwrap_or_else(|_| "best-effort".to_string())
            .parse::<InstallPolicy>()?;
        let activate_on_startup = env::var("ACTIVATE_ON_STARTUP")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .map_err(|_| "ACTIVATE_ON_STARTUP must be 'true' or 'false'")?;
        let strategies = StrategyTable {
            navigation: env::var("NAVIGATION_STRATEGY")
                .unwrap_or_else(|_| "cache-first".to_string())
                .parse()?,
            asset: env::var("ASSET_STRATEGY")
                .unwrap_or_else(|_| "cache-first".to_string())
                .parse()?,
        };
        let revalidate_assets = env::var("REVALIDATE_ASSETS")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .map_err(|_| "REVALIDATE_ASSETS must be 'true' or 'false'")?;
        let hot_cache_entries = env::var("HOT_CACHE_ENTRIES")
            .unwrap_or_else(|_| "256".to_string())
            .parse::<u64>()
            .map_err(|e| format!("Invalid HOT_CACHE_ENTRIES: {e}"))?;

        // Record store configuration from env
        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
        let primary_quota_bytes = env::var("PRIMARY_QUOTA_BYTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5 * 1024 * 1024); // 5 MiB, sized like a browser key-value store
        let secondary_enabled = env::var("SECONDARY_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .map_err(|_| "SECONDARY_ENABLED must be 'true' or 'false'")?;

        let probe_interval_secs = env::var("PROBE_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30)
            .max(1);

        Ok(ServerConfig {
            host,
            port,
            deployment,
            origin_url,
            bundle_dir,
            asset_version,
            namespace_prefix,
            manifest_path,
            install_policy,
            activate_on_startup,
            strategies,
            revalidate_assets,
            hot_cache_entries,
            data_dir,
            primary_quota_bytes,
            secondary_enabled,
            probe_interval_secs,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory holding the quota-limited primary record files.
    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }

    /// SQLite database backing the secondary record store.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("records.db")
    }

    /// Root under which versioned resource namespaces live.
    pub fn resources_dir(&self) -> PathBuf {
        self.data_dir.join("resources")
    }
}

fn parse_deployment(value: &str) -> Result<DeploymentMode, String> {
    match value {
        "hosted" => Ok(DeploymentMode::Hosted),
        "embedded" => Ok(DeploymentMode::Embedded),
        other => Err(format!(
            "Unknown DEPLOYMENT_MODE '{other}', expected 'hosted' or 'embedded'"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deployment_modes() {
        assert_eq!(parse_deployment("hosted").unwrap(), DeploymentMode::Hosted);
        assert_eq!(
            parse_deployment("embedded").unwrap(),
            DeploymentMode::Embedded
        );
        assert!(parse_deployment("peer-to-peer").is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = ServerConfig {
            host: "localhost".to_string(),
            port: 8780,
            deployment: DeploymentMode::Hosted,
            origin_url: Some("http://localhost:9000".to_string()),
            bundle_dir: None,
            asset_version: "4.13".to_string(),
            namespace_prefix: "static-".to_string(),
            manifest_path: None,
            install_policy: InstallPolicy::BestEffort,
            activate_on_startup: true,
            strategies: StrategyTable::default(),
            revalidate_assets: true,
            hot_cache_entries: 256,
            data_dir: PathBuf::from("/var/lib/haven"),
            primary_quota_bytes: 5 * 1024 * 1024,
            secondary_enabled: true,
            probe_interval_secs: 30,
        };

        assert_eq!(config.address(), "localhost:8780");
        assert_eq!(
            config.records_dir(),
            PathBuf::from("/var/lib/haven/records")
        );
        assert_eq!(
            config.sqlite_path(),
            PathBuf::from("/var/lib/haven/records.db")
        );
        assert_eq!(
            config.resources_dir(),
            PathBuf::from("/var/lib/haven/resources")
        );
    }
}
