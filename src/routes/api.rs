use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::middleware::root_upgrade_middleware;
use crate::state::AppState;
use std::sync::Arc;

/// Create the public API router
///
/// These routes sit outside the signature gate. WebSocket upgrades on `/`
/// are handed to `upgrades`, which applies the gate itself.
pub fn create_api_router(upgrades: Router) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            get(api::health_check).route_layer(middleware::from_fn_with_state(
                upgrades,
                root_upgrade_middleware,
            )),
        )
        .layer(TraceLayer::new_for_http())
}
