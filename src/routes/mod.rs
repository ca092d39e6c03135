//! Router assembly
//!
//! - `api` - public routes (health check)
//! - `audioconnector` - the gated WebSocket upgrade routes, any path

pub mod api;
pub mod audioconnector;

use axum::Router;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

use crate::state::AppState;

/// Request rates at or above this disable rate limiting
const RATE_LIMIT_DISABLED_AT: u32 = 100_000;

/// Build the complete application router.
///
/// The router needs to be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`: connection limits
/// and rate limiting key on the peer address.
pub fn create_app(state: Arc<AppState>) -> Router {
    let rate_limit_rps = state.config.rate_limit_requests_per_second;
    let rate_limit_burst = state.config.rate_limit_burst_size;

    let governor_layer = if rate_limit_rps < RATE_LIMIT_DISABLED_AT {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(u64::from(rate_limit_rps))
            .burst_size(rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish();
        if governor_config.is_none() {
            warn!(
                rps = rate_limit_rps,
                burst = rate_limit_burst,
                "Invalid rate limiter settings, rate limiting disabled"
            );
        }
        governor_config.map(GovernorLayer::new)
    } else {
        info!("Rate limiting disabled (rate >= {RATE_LIMIT_DISABLED_AT}/s)");
        None
    };

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    // Upgrades on `/` are diverted here from the health route; every other
    // path falls through to it
    let upgrades: Router =
        audioconnector::create_audioconnector_router(state.clone()).with_state(state.clone());

    api::create_api_router(upgrades.clone())
        .fallback_service(upgrades)
        .with_state(state)
        .layer(tower::util::option_layer(governor_layer))
        .layer(security_headers)
}
