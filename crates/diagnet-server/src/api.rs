pub mod analysis;
pub mod data;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{extract::State, Json};
use chrono::Utc;
use diagnet_ingest::{ConnectionState, MetricsSnapshot};
use diagnet_storage::StoreError;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::state::AppState;

/// Failure body for user-visible errors: a stable machine-readable code
/// plus a human message. Internals never leak through here.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

pub fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(ApiError {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Maps store failures onto the HTTP surface: transient unavailability is
/// 503 (retryable by the client), schema rejection is 400.
pub fn store_error_response(e: &StoreError) -> Response {
    match e {
        StoreError::Unavailable(_) => {
            tracing::error!(error = %e, "store unavailable");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "storage is temporarily unavailable",
            )
        }
        StoreError::Rejected(_) => {
            tracing::error!(error = %e, "store rejected data");
            error_response(
                StatusCode::BAD_REQUEST,
                "store_rejected",
                "the data could not be stored",
            )
        }
    }
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: i64,
    mqtt: ConnectionState,
    ingest: MetricsSnapshot,
}

/// Unauthenticated liveness probe with pipeline counters.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
async fn health(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        mqtt: state.mqtt_status.get(),
        ingest: state.ingest_metrics.snapshot(),
    })
    .into_response()
}

/// Routes that never require a bearer token.
pub fn public_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(health))
}

/// Routes mounted behind the bearer filter.
pub fn protected_routes() -> OpenApiRouter<AppState> {
    data::data_routes().merge(analysis::analysis_routes())
}
