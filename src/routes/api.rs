use axum::{
    Router,
    routing::{delete, get, put},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{status, store};
use crate::state::AppState;
use std::sync::Arc;

pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/store/{key}",
            put(store::save_record)
                .get(store::load_record)
                .delete(store::clear_record),
        )
        .route("/api/store", delete(store::clear_all))
        .route("/api/storage/info", get(store::storage_info))
        .route("/api/status", get(status::get_status))
        .layer(TraceLayer::new_for_http())
}
