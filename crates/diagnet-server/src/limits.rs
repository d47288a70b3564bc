use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Enforces the per-request deadline. An expired request gets 504 with an
/// empty body; the handler's partial output is discarded.
pub async fn request_deadline(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match tokio::time::timeout(state.request_timeout, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => {
            tracing::warn!(timeout_s = state.request_timeout.as_secs(), "request deadline exceeded");
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}
