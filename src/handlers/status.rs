//! Gateway status endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::core::resource::CacheStatus;
use crate::core::store::{MetricsSnapshot, StorageInfo};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub online: bool,
    pub cache: CacheStatus,
    pub storage: StorageInfo,
    pub store_metrics: MetricsSnapshot,
}

/// Snapshot of the gateway: connectivity, cache generation and store usage.
pub async fn get_status(State(state): State<Arc<AppState>>) -> AppResult<Json<StatusResponse>> {
    let cache = state
        .cache
        .status()
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    Ok(Json(StatusResponse {
        version: state.config.asset_version.clone(),
        online: state.connectivity.is_online(),
        cache,
        storage: state.store.storage_info().await,
        store_metrics: state.store.metrics_snapshot(),
    }))
}
