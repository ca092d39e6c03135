//! AudioConnector WebSocket route configuration

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::audioconnector_handler;
use crate::middleware::{auth_middleware, connection_limit_middleware};
use crate::state::AppState;
use std::sync::Arc;

/// Create the AudioConnector WebSocket router
///
/// # Endpoint
///
/// `GET /` and `GET /{*path}` - WebSocket upgrade. The path and query select
/// the bot. On `/` only upgrade requests get here; see
/// [`create_api_router`](super::api::create_api_router).
///
/// # Authentication
///
/// The upgrade request must carry `X-API-KEY` and `audiohook-session-id`
/// headers and, unless unsigned requests are allowed, an HTTP message
/// signature covering `@request-target`, `@authority`,
/// `audiohook-organization-id`, `audiohook-session-id`,
/// `audiohook-correlation-id` and `x-api-key`.
///
/// Layer order (outer to inner): connection limit -> signature gate -> handler.
pub fn create_audioconnector_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(audioconnector_handler))
        .route("/{*path}", get(audioconnector_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn_with_state(
            state,
            connection_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}
