//! Resource acquisition behind the cache.
//!
//! Hosted deployments fetch misses from the configured origin over HTTP.
//! Embedded deployments read them from a local asset bundle and treat the
//! network as nonexistent.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName};
use reqwest::{Method, StatusCode, Url};
use std::path::{Component, Path, PathBuf};

use super::types::{FetchedResource, PrecacheError, Result};

/// An upstream reply carried back verbatim for pass-through requests.
#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Where cache misses and background refreshes come from.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// GET a resource by absolute request path, query string included.
    async fn fetch(&self, path: &str) -> Result<FetchedResource>;

    /// Forward a non-GET request, headers and body included. Embedded
    /// deployments have nowhere to forward to and report failure.
    async fn forward(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<ForwardedResponse>;
}

/// Headers that belong to a single connection rather than the message
/// (RFC 7230 hop-by-hop set, plus framing each hop recomputes).
const CONNECTION_HEADERS: [HeaderName; 10] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
    header::CONTENT_LENGTH,
];

fn strip_connection_headers(headers: &mut HeaderMap) {
    for name in &CONNECTION_HEADERS {
        headers.remove(name);
    }
}

/// Fetches from the origin server fronted by the gateway.
pub struct OriginFetcher {
    client: reqwest::Client,
    base: Url,
}

impl OriginFetcher {
    pub fn new(origin_url: &str) -> Result<Self> {
        let mut base = Url::parse(origin_url)
            .map_err(|e| PrecacheError::InvalidOrigin(format!("{origin_url}: {e}")))?;
        if base.host_str().is_none() {
            return Err(PrecacheError::InvalidOrigin(format!(
                "{origin_url}: missing host"
            )));
        }
        // Request paths are joined relative to the base so a path prefix
        // on the origin URL survives.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| PrecacheError::Fetch {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// Redirects that escape the origin produce responses the cache must
    /// not keep.
    fn same_origin(&self, url: &Url) -> bool {
        url.scheme() == self.base.scheme()
            && url.host_str() == self.base.host_str()
            && url.port_or_known_default() == self.base.port_or_known_default()
    }
}

#[async_trait]
impl ResourceFetcher for OriginFetcher {
    async fn fetch(&self, path: &str) -> Result<FetchedResource> {
        let url = self.url_for(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PrecacheError::Fetch {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let same_origin = self.same_origin(response.url());
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| PrecacheError::Fetch {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(FetchedResource {
            status,
            content_type,
            body,
            cacheable: status == 200 && same_origin,
        })
    }

    async fn forward(
        &self,
        method: Method,
        path: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<ForwardedResponse> {
        let url = self.url_for(path)?;
        strip_connection_headers(&mut headers);

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| PrecacheError::Fetch {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_connection_headers(&mut headers);
        let body = response.bytes().await.map_err(|e| PrecacheError::Fetch {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ForwardedResponse {
            status,
            headers,
            body,
        })
    }
}

/// Reads from a local asset bundle shipped with the application.
pub struct BundleFetcher {
    root: PathBuf,
}

impl BundleFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Maps a request path to a bundle file, rejecting traversal.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let trimmed = path.split(['?', '#']).next().unwrap_or(path);
        let mut relative = trimmed.trim_start_matches('/');
        if relative.is_empty() {
            relative = "index.html";
        }

        let candidate = Path::new(relative);
        if candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }

        Some(self.root.join(candidate))
    }
}

#[async_trait]
impl ResourceFetcher for BundleFetcher {
    async fn fetch(&self, path: &str) -> Result<FetchedResource> {
        let Some(file) = self.resolve(path) else {
            return Ok(FetchedResource {
                status: 400,
                content_type: None,
                body: Bytes::new(),
                cacheable: false,
            });
        };

        match tokio::fs::read(&file).await {
            Ok(data) => Ok(FetchedResource {
                status: 200,
                content_type: Some(content_type_for(&file).to_string()),
                body: Bytes::from(data),
                cacheable: true,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FetchedResource {
                status: 404,
                content_type: None,
                body: Bytes::new(),
                cacheable: false,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn forward(
        &self,
        method: Method,
        path: &str,
        _headers: HeaderMap,
        _body: Bytes,
    ) -> Result<ForwardedResponse> {
        Err(PrecacheError::Fetch {
            path: path.to_string(),
            reason: format!("no origin to forward {method} requests to in embedded mode"),
        })
    }
}

/// Content type from the file extension; bundle files carry no headers.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_same_origin_comparison() {
        let fetcher = OriginFetcher::new("http://127.0.0.1:9000").unwrap();

        assert!(fetcher.same_origin(&Url::parse("http://127.0.0.1:9000/a/b?q=1").unwrap()));
        assert!(!fetcher.same_origin(&Url::parse("http://127.0.0.1:9001/a").unwrap()));
        assert!(!fetcher.same_origin(&Url::parse("https://127.0.0.1:9000/a").unwrap()));
        assert!(!fetcher.same_origin(&Url::parse("http://cdn.example.com/a").unwrap()));
    }

    #[test]
    fn test_invalid_origin_is_rejected() {
        assert!(OriginFetcher::new("not a url").is_err());
        assert!(OriginFetcher::new("file:///tmp").is_err());
    }

    #[test]
    fn test_origin_path_prefix_survives_joins() {
        let prefixed = OriginFetcher::new("http://127.0.0.1:9000/app").unwrap();
        assert_eq!(
            prefixed.url_for("/index.html").unwrap().as_str(),
            "http://127.0.0.1:9000/app/index.html"
        );
        assert_eq!(
            prefixed.url_for("/js/main.js?v=2").unwrap().as_str(),
            "http://127.0.0.1:9000/app/js/main.js?v=2"
        );

        let bare = OriginFetcher::new("http://127.0.0.1:9000").unwrap();
        assert_eq!(
            bare.url_for("/index.html").unwrap().as_str(),
            "http://127.0.0.1:9000/index.html"
        );
        // Protocol-relative paths stay inside the origin.
        assert_eq!(
            bare.url_for("//evil.example/x").unwrap().as_str(),
            "http://127.0.0.1:9000/evil.example/x"
        );
    }

    #[test]
    fn test_connection_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer token".parse().unwrap());
        headers.insert(header::COOKIE, "session=1".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::HOST, "gateway.local".parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, "4".parse().unwrap());

        strip_connection_headers(&mut headers);

        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer token");
        assert_eq!(headers.get(header::COOKIE).unwrap(), "session=1");
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn test_bundle_fetch_and_content_types() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("index.html"), "<h1>app</h1>")
            .await
            .unwrap();
        tokio::fs::create_dir(temp_dir.path().join("js")).await.unwrap();
        tokio::fs::write(temp_dir.path().join("js/app.js"), "let x = 1;")
            .await
            .unwrap();

        let fetcher = BundleFetcher::new(temp_dir.path().to_path_buf());

        let page = fetcher.fetch("/index.html").await.unwrap();
        assert_eq!(page.status, 200);
        assert!(page.cacheable);
        assert_eq!(page.content_type.as_deref(), Some("text/html; charset=utf-8"));

        let script = fetcher.fetch("/js/app.js?v=2").await.unwrap();
        assert_eq!(script.status, 200);
        assert_eq!(script.body, Bytes::from("let x = 1;"));

        // Root resolves to the index document.
        let root = fetcher.fetch("/").await.unwrap();
        assert_eq!(root.body, Bytes::from("<h1>app</h1>"));
    }

    #[tokio::test]
    async fn test_bundle_missing_file_is_404_not_error() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = BundleFetcher::new(temp_dir.path().to_path_buf());

        let result = fetcher.fetch("/absent.css").await.unwrap();
        assert_eq!(result.status, 404);
        assert!(!result.cacheable);
    }

    #[tokio::test]
    async fn test_bundle_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = BundleFetcher::new(temp_dir.path().to_path_buf());

        let result = fetcher.fetch("/../etc/passwd").await.unwrap();
        assert_eq!(result.status, 400);
    }

    #[tokio::test]
    async fn test_bundle_cannot_forward() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = BundleFetcher::new(temp_dir.path().to_path_buf());

        let result = fetcher
            .forward(Method::POST, "/api/thing", HeaderMap::new(), Bytes::new())
            .await;
        assert!(matches!(result, Err(PrecacheError::Fetch { .. })));
    }
}
