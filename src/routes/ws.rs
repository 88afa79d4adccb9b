use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::control;
use crate::state::AppState;
use std::sync::Arc;

/// Create the WebSocket control router
///
/// The `/ws` endpoint is unauthenticated: it exposes no data beyond the
/// build version and accepts nothing destructive. Activation through
/// SKIP_WAITING only promotes a namespace the gateway itself installed.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(control::ws_control_handler))
        .layer(TraceLayer::new_for_http())
}
