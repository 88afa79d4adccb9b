//! Request interception.
//!
//! Every request not matched by the gateway's own API lands here. GET
//! requests are answered from the resource cache according to the
//! configured strategy and fall back to offline placeholders when both the
//! cache and the network come up empty. Other methods are forwarded
//! upstream untouched.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::resource::{
    classify, is_image_request, CachedResponse, FetchedResource, RequestClass, ServeStrategy,
    OFFLINE_IMAGE_SVG, OFFLINE_NOTICE,
};
use crate::state::AppState;

const MAX_FORWARD_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Last-resort navigation body when no offline document is cached.
const OFFLINE_DOCUMENT_FALLBACK: &str = "<!DOCTYPE html><html><head><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page is not available offline.</p></body></html>";

/// Fallback handler serving intercepted traffic.
pub async fn intercept(State(state): State<Arc<AppState>>, req: Request) -> Response {
    // The query string is part of the cache key.
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    if req.method() != Method::GET {
        return pass_through(&state, req, &path).await;
    }

    let class = classify(req.headers());
    match state.config.strategies.for_class(class) {
        ServeStrategy::CacheFirst => serve_cache_first(&state, class, &path, req.headers()).await,
        ServeStrategy::NetworkFirst => {
            serve_network_first(&state, class, &path, req.headers()).await
        }
    }
}

async fn serve_cache_first(
    state: &Arc<AppState>,
    class: RequestClass,
    path: &str,
    headers: &HeaderMap,
) -> Response {
    if let Some(hit) = state.cache.lookup(path).await {
        maybe_spawn_refresh(state, class, path);
        return cached_response(hit, "hit");
    }

    match state.fetcher.fetch(path).await {
        Ok(resource) => {
            if resource.status == 200 && resource.cacheable {
                state
                    .cache
                    .store_entry(path.to_string(), resource.clone().into_cached())
                    .await;
            }
            network_response(resource)
        }
        Err(e) => {
            debug!("Fetch of {} failed: {}", path, e);
            offline_fallback(state, class, path, headers).await
        }
    }
}

async fn serve_network_first(
    state: &Arc<AppState>,
    class: RequestClass,
    path: &str,
    headers: &HeaderMap,
) -> Response {
    match state.fetcher.fetch(path).await {
        Ok(resource) => {
            if resource.status == 200 && resource.cacheable {
                state
                    .cache
                    .store_entry(path.to_string(), resource.clone().into_cached())
                    .await;
            }
            network_response(resource)
        }
        Err(e) => {
            debug!("Fetch of {} failed, trying cache: {}", path, e);
            match state.cache.lookup(path).await {
                Some(hit) => cached_response(hit, "hit"),
                None => offline_fallback(state, class, path, headers).await,
            }
        }
    }
}

/// Forwards a non-GET request upstream, request and response headers
/// intact apart from connection-level ones.
async fn pass_through(state: &Arc<AppState>, req: Request, path: &str) -> Response {
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();

    let body = match to_bytes(body, MAX_FORWARD_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Request body unreadable: {e}"),
            )
                .into_response()
        }
    };

    match state
        .fetcher
        .forward(method.clone(), path, parts.headers, body)
        .await
    {
        Ok(upstream) => {
            let mut response =
                (upstream.status, Body::from(upstream.body)).into_response();
            response.headers_mut().extend(upstream.headers);
            response.headers_mut().insert(
                HeaderName::from_static("x-cache"),
                HeaderValue::from_static("network"),
            );
            response
        }
        Err(e) => {
            warn!("Forwarding {} {} failed: {}", method, path, e);
            (StatusCode::BAD_GATEWAY, "Upstream unreachable").into_response()
        }
    }
}

/// Refreshes a served cache hit in the background. Navigations always
/// revalidate; assets only when configured to.
fn maybe_spawn_refresh(state: &Arc<AppState>, class: RequestClass, path: &str) {
    let refresh = match class {
        RequestClass::Navigation => true,
        RequestClass::Asset => state.config.revalidate_assets,
    };
    if !refresh {
        return;
    }

    let state = state.clone();
    let path = path.to_string();
    tokio::spawn(async move {
        match state.fetcher.fetch(&path).await {
            Ok(resource) if resource.status == 200 && resource.cacheable => {
                state.cache.store_entry(path, resource.into_cached()).await;
            }
            Ok(_) => {}
            Err(e) => debug!("Background refresh of {} failed: {}", path, e),
        }
    });
}

/// Answers a request that missed both the cache and the network.
async fn offline_fallback(
    state: &Arc<AppState>,
    class: RequestClass,
    path: &str,
    headers: &HeaderMap,
) -> Response {
    match class {
        RequestClass::Navigation => {
            if let Ok(status) = state.cache.status().await
                && let Some(doc) = status.offline_document
                && let Some(page) = state.cache.lookup(&doc).await
            {
                return cached_response(page, "fallback");
            }
            build_response(
                503,
                Some("text/html; charset=utf-8".to_string()),
                Bytes::from_static(OFFLINE_DOCUMENT_FALLBACK.as_bytes()),
                "fallback",
            )
        }
        RequestClass::Asset => {
            if is_image_request(path, headers) {
                build_response(
                    200,
                    Some("image/svg+xml".to_string()),
                    Bytes::from_static(OFFLINE_IMAGE_SVG.as_bytes()),
                    "fallback",
                )
            } else {
                build_response(
                    503,
                    Some("text/plain; charset=utf-8".to_string()),
                    Bytes::from_static(OFFLINE_NOTICE.as_bytes()),
                    "fallback",
                )
            }
        }
    }
}

fn cached_response(hit: CachedResponse, source: &'static str) -> Response {
    build_response(hit.status, hit.content_type, hit.body, source)
}

fn network_response(resource: FetchedResource) -> Response {
    build_response(
        resource.status,
        resource.content_type,
        resource.body,
        "network",
    )
}

fn build_response(
    status: u16,
    content_type: Option<String>,
    body: Bytes,
    source: &'static str,
) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut response = (status, body).into_response();

    if let Some(ct) = content_type
        && let Ok(value) = HeaderValue::from_str(&ct)
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response.headers_mut().insert(
        HeaderName::from_static("x-cache"),
        HeaderValue::from_static(source),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_response_headers() {
        let response = build_response(
            200,
            Some("text/css".to_string()),
            Bytes::from_static(b"body{}"),
            "hit",
        );

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-cache").unwrap(), "hit");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/css"
        );

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"body{}"));
    }

    #[test]
    fn test_invalid_status_degrades_to_ok() {
        let response = build_response(0, None, Bytes::new(), "network");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
