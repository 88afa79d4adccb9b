//! Durable record store endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;
use std::sync::Arc;

use crate::core::store::{ClearOutcome, SaveOutcome, StorageInfo};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

const MAX_KEY_LENGTH: usize = 512;

fn validate_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() {
        return Err(AppError::BadRequest(
            "record key must not be empty".to_string(),
        ));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(AppError::BadRequest(format!(
            "record key exceeds {MAX_KEY_LENGTH} bytes"
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(AppError::BadRequest(
            "record key contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Saves a JSON payload under a key. Failures come back in the outcome
/// body rather than as HTTP errors, so callers can always read a verdict.
pub async fn save_record(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(data): Json<Value>,
) -> AppResult<Json<SaveOutcome>> {
    validate_key(&key)?;
    Ok(Json(state.store.save(&key, data).await))
}

/// Loads the payload saved under a key. An absent key reads as JSON null.
pub async fn load_record(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> AppResult<Json<Value>> {
    validate_key(&key)?;
    Ok(Json(state.store.load(&key).await.unwrap_or(Value::Null)))
}

/// Removes one key from every tier.
pub async fn clear_record(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> AppResult<Json<ClearOutcome>> {
    validate_key(&key)?;
    Ok(Json(state.store.clear(Some(&key)).await))
}

/// Removes every record from every tier.
pub async fn clear_all(State(state): State<Arc<AppState>>) -> Json<ClearOutcome> {
    Json(state.store.clear(None).await)
}

/// Reports usage across both tiers.
pub async fn storage_info(State(state): State<Arc<AppState>>) -> Json<StorageInfo> {
    Json(state.store.storage_info().await)
}
