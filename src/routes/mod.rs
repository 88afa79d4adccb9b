//! Route assembly for the gateway.

pub mod api;
pub mod ws;

use axum::Router;
use std::sync::Arc;

use crate::handlers;
use crate::state::AppState;

/// Builds the full application router: the gateway's own API, the control
/// channel, and the interception fallback for everything else.
pub fn create_router() -> Router<Arc<AppState>> {
    api::create_api_router()
        .merge(ws::create_ws_router())
        .fallback(handlers::intercept::intercept)
}
