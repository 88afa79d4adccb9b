//! Request classification and serving strategy selection.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Placeholder body for image requests that miss while offline.
pub const OFFLINE_IMAGE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1"><rect width="1" height="1" fill="#e0e0e0"/></svg>"##;

/// Placeholder body for non-image asset requests that miss while offline.
pub const OFFLINE_NOTICE: &str = "Offline: this resource is not cached.";

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"];

/// How a GET request is treated by the interception layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Document loads; falls back to the offline page.
    Navigation,
    /// Everything else; falls back to a typed placeholder.
    Asset,
}

/// Order in which the cache and the network are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServeStrategy {
    CacheFirst,
    NetworkFirst,
}

impl FromStr for ServeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache-first" => Ok(Self::CacheFirst),
            "network-first" => Ok(Self::NetworkFirst),
            other => Err(format!(
                "unknown strategy '{other}', expected 'cache-first' or 'network-first'"
            )),
        }
    }
}

/// Per-class strategy assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyTable {
    pub navigation: ServeStrategy,
    pub asset: ServeStrategy,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            navigation: ServeStrategy::CacheFirst,
            asset: ServeStrategy::CacheFirst,
        }
    }
}

impl StrategyTable {
    pub fn for_class(&self, class: RequestClass) -> ServeStrategy {
        match class {
            RequestClass::Navigation => self.navigation,
            RequestClass::Asset => self.asset,
        }
    }
}

/// Classifies a GET request from its headers.
///
/// Browsers mark document loads with `Sec-Fetch-Mode: navigate`; older
/// clients are recognized by an Accept header that asks for HTML.
pub fn classify(headers: &HeaderMap) -> RequestClass {
    let fetch_mode = headers
        .get("sec-fetch-mode")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if fetch_mode == "navigate" {
        return RequestClass::Navigation;
    }

    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if accept.contains("text/html") {
        return RequestClass::Navigation;
    }

    RequestClass::Asset
}

/// Whether an asset request is for an image, by Accept header or extension.
pub fn is_image_request(path: &str, headers: &HeaderMap) -> bool {
    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if accept.starts_with("image/") {
        return true;
    }

    let trimmed = path.split(['?', '#']).next().unwrap_or(path);
    trimmed
        .rsplit('.')
        .next()
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_classify_navigation_by_fetch_mode() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        assert_eq!(classify(&headers), RequestClass::Navigation);
    }

    #[test]
    fn test_classify_navigation_by_accept() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );
        assert_eq!(classify(&headers), RequestClass::Navigation);
    }

    #[test]
    fn test_classify_asset_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        assert_eq!(classify(&headers), RequestClass::Asset);
        assert_eq!(classify(&HeaderMap::new()), RequestClass::Asset);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "cache-first".parse::<ServeStrategy>().unwrap(),
            ServeStrategy::CacheFirst
        );
        assert_eq!(
            "network-first".parse::<ServeStrategy>().unwrap(),
            ServeStrategy::NetworkFirst
        );
        assert!("freshest".parse::<ServeStrategy>().is_err());
    }

    #[test]
    fn test_image_detection() {
        let headers = HeaderMap::new();
        assert!(is_image_request("/logo.png", &headers));
        assert!(is_image_request("/pics/photo.JPEG?w=100", &headers));
        assert!(!is_image_request("/app.js", &headers));
        assert!(!is_image_request("/logo", &headers));

        let mut accept_image = HeaderMap::new();
        accept_image.insert(
            axum::http::header::ACCEPT,
            HeaderValue::from_static("image/avif,image/webp"),
        );
        assert!(is_image_request("/dynamic-resource", &accept_image));
    }
}
