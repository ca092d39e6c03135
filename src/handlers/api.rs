use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Sessions currently registered
    pub sessions: usize,
    /// WebSocket connections currently holding a slot
    pub connections: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        sessions: state.sessions.len(),
        connections: state.ws_connection_count(),
    })
}
