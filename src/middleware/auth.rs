use crate::auth::signature::header_value;
use crate::auth::{API_KEY_HEADER, Auth, GateVerdict};
use crate::errors::auth_error::AuthError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Signature gate for AudioConnector upgrade requests
///
/// The middleware:
/// 1. Runs the request headers and target through the [`AuthenticationGate`]
/// 2. Returns 401 without upgrading when the gate fails the request
/// 3. Inserts an [`Auth`] context into request extensions on success
///
/// Unsigned requests pass only when the gate policy allows them.
///
/// [`AuthenticationGate`]: crate::auth::AuthenticationGate
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let request_path = request.uri().path().to_string();

    tracing::debug!(path = %request_path, "Starting upgrade authentication");

    let verdict = state.gate.verify(request.headers(), request.uri()).await;
    let key_id = header_value(request.headers(), API_KEY_HEADER);

    match verdict {
        GateVerdict::Verified { signed: true } => {
            tracing::info!(
                path = %request_path,
                key_id = key_id.as_deref().unwrap_or_default(),
                "Signed upgrade request verified"
            );
            let auth = match key_id {
                Some(key_id) => Auth::signed(key_id),
                None => Auth::unsigned(None),
            };
            request.extensions_mut().insert(auth);
            Ok(next.run(request).await)
        }
        GateVerdict::Verified { signed: false } => {
            tracing::debug!(path = %request_path, "Unsigned upgrade request accepted");
            request.extensions_mut().insert(Auth::unsigned(key_id));
            Ok(next.run(request).await)
        }
        GateVerdict::Failed(failure) => {
            tracing::warn!(
                path = %request_path,
                kind = %failure.kind,
                reason = %failure.message,
                "Upgrade authentication failed"
            );
            Err(AuthError::Rejected {
                kind: failure.kind,
                message: failure.message,
            })
        }
    }
}
