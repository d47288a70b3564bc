use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::store_error_response;
use crate::state::AppState;

/// Plenty for a day of per-second telemetry from one machine.
const ANALYSIS_SCAN_CAP: usize = 10_000;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct AnalysisQuery {
    /// Analysis window in hours (default 24).
    hours: Option<u32>,
}

/// Health assessment for one machine over its recent readings.
///
/// Pulls the raw slice from the store and runs the threshold and
/// standardized-score passes on it; fewer points than the configured
/// minimum yields INSUFFICIENT_DATA rather than a partial verdict.
#[utoipa::path(
    get,
    path = "/analysis/machine/{id}",
    tag = "Analysis",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Machine identifier"), AnalysisQuery),
    responses(
        (status = 200, description = "Health assessment", body = diagnet_common::types::AnalysisResult),
        (status = 503, description = "Store unavailable", body = crate::api::ApiError)
    )
)]
async fn analyze_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AnalysisQuery>,
) -> Response {
    let hours = query.hours.unwrap_or(24);
    let since = Utc::now() - Duration::hours(hours as i64);

    let readings = match state.store.scan_machine(&id, since, ANALYSIS_SCAN_CAP) {
        Ok(readings) => readings,
        // No partial assessment on a failed read.
        Err(e) => return store_error_response(&e),
    };

    let result = state.analyzer.analyze(&id, &readings, Utc::now());
    tracing::info!(
        machine_id = %id,
        hours,
        points = result.statistics.data_points_analyzed,
        status = ?result.status,
        "analysis served"
    );
    Json(result).into_response()
}

pub fn analysis_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(analyze_machine))
}
