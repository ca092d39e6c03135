//! Hand WebSocket upgrades aimed at `/` to the AudioConnector router
//!
//! `GET /` serves the health check, but AudioConnector clients may connect on
//! any URL, the root included. Upgrade requests on the root are forwarded to
//! the gated upgrade router; everything else reaches the health handler.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower::ServiceExt;

use super::connection_limit::is_websocket_upgrade;

/// Route layer for `/` that forwards upgrade requests to `upgrades`.
pub async fn root_upgrade_middleware(
    State(upgrades): State<Router>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    tracing::debug!("Forwarding root upgrade to the AudioConnector router");
    match upgrades.oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
