use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use diagnet_common::types::{MachineStatus, RawReading};
use diagnet_storage::Metric;

use crate::api::{error_response, store_error_response, ApiError};
use crate::state::AppState;

const RECENT_DEFAULT: usize = 100;
const RECENT_MAX: usize = 1000;
/// Internal cap for uncapped list endpoints.
const SCAN_CAP: usize = 10_000;
const TEMPERATURE_ALERT_DEFAULT: f64 = 100.0;
const VIBRATION_ALERT_DEFAULT: f64 = 0.8;
const ALERT_HOURS_DEFAULT: u32 = 24;

/// Everything before the store epoch; used for "full history" scans.
fn beginning_of_time() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct RecentQuery {
    /// Max readings to return (default 100, capped at 1000).
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct HoursQuery {
    /// Look-back window in hours (default 24).
    hours: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct RangeQuery {
    /// ISO-8601 without timezone, read as UTC.
    start: NaiveDateTime,
    end: NaiveDateTime,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct AlertQuery {
    threshold: Option<f64>,
    hours: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
struct MachineStats {
    machine_id: String,
    average_temperature: Option<f64>,
    total_readings: u64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
struct MachineCount {
    machine_id: String,
    count: u64,
}

/// Accepts one reading over HTTP, applying the same validation and quality
/// rules as the broker path.
#[utoipa::path(
    post,
    path = "/data",
    tag = "Data",
    security(("bearer_auth" = [])),
    request_body = RawReading,
    responses(
        (status = 201, description = "Reading stored", body = diagnet_common::types::Reading),
        (status = 400, description = "Validation failure", body = ApiError),
        (status = 503, description = "Store unavailable", body = ApiError)
    )
)]
async fn submit_reading(
    State(state): State<AppState>,
    payload: Result<Json<RawReading>, JsonRejection>,
) -> Response {
    let Json(raw) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "malformed_payload",
                &rejection.body_text(),
            );
        }
    };

    let reading = match raw.validate(Utc::now(), state.clock_skew) {
        Ok(reading) => reading,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "validation_error", &e.to_string());
        }
    };

    if let Err(e) = state.quality.check(&reading) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "quality_check_failed",
            &e.to_string(),
        );
    }

    match state.store.append_batch(std::slice::from_ref(&reading)) {
        Ok(_) => {
            tracing::debug!(machine_id = %reading.machine_id, "stored reading via HTTP");
            (StatusCode::CREATED, Json(reading)).into_response()
        }
        Err(e) => store_error_response(&e),
    }
}

/// Most recent readings across all machines.
#[utoipa::path(
    get,
    path = "/data/recent",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(RecentQuery),
    responses(
        (status = 200, description = "Descending list", body = Vec<diagnet_common::types::Reading>)
    )
)]
async fn recent_readings(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(RECENT_DEFAULT).min(RECENT_MAX);
    match state.store.scan_recent(limit) {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Full history for one machine (internally capped).
#[utoipa::path(
    get,
    path = "/data/machine/{id}",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Machine identifier")),
    responses(
        (status = 200, description = "Descending list", body = Vec<diagnet_common::types::Reading>)
    )
)]
async fn machine_readings(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.scan_machine(&id, beginning_of_time(), SCAN_CAP) {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Readings for one machine within the last N hours.
#[utoipa::path(
    get,
    path = "/data/machine/{id}/recent",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Machine identifier"), HoursQuery),
    responses(
        (status = 200, description = "Descending list", body = Vec<diagnet_common::types::Reading>)
    )
)]
async fn machine_recent_readings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HoursQuery>,
) -> Response {
    let hours = query.hours.unwrap_or(ALERT_HOURS_DEFAULT);
    let since = Utc::now() - Duration::hours(hours as i64);
    match state.store.scan_machine(&id, since, SCAN_CAP) {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Total stored readings for one machine.
#[utoipa::path(
    get,
    path = "/data/machine/{id}/count",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Machine identifier")),
    responses(
        (status = 200, description = "Reading count", body = MachineCount)
    )
)]
async fn machine_reading_count(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.count_machine(&id) {
        Ok(count) => Json(MachineCount {
            machine_id: id,
            count,
        })
        .into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Cross-machine readings in a closed time range.
#[utoipa::path(
    get,
    path = "/data/range",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(RangeQuery),
    responses(
        (status = 200, description = "Descending list", body = Vec<diagnet_common::types::Reading>),
        (status = 400, description = "Invalid range", body = ApiError)
    )
)]
async fn range_readings(
    State(state): State<AppState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                &rejection.body_text(),
            );
        }
    };

    if query.start >= query.end {
        return error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "start must be before end",
        );
    }

    match state
        .store
        .scan_range(query.start.and_utc(), query.end.and_utc(), SCAN_CAP)
    {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Readings filtered by device-reported status.
#[utoipa::path(
    get,
    path = "/data/status/{status}",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(("status" = String, Path, description = "RUNNING, IDLE, WARNING, or CRITICAL")),
    responses(
        (status = 200, description = "Descending list", body = Vec<diagnet_common::types::Reading>),
        (status = 400, description = "Unknown status", body = ApiError)
    )
)]
async fn status_readings(State(state): State<AppState>, Path(status): Path<String>) -> Response {
    let status: MachineStatus = match status.parse() {
        Ok(s) => s,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "status must be one of RUNNING, IDLE, WARNING, CRITICAL",
            );
        }
    };

    match state.store.scan_status(status, SCAN_CAP) {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Readings above a temperature threshold within the look-back window.
#[utoipa::path(
    get,
    path = "/data/alerts/temperature",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(AlertQuery),
    responses(
        (status = 200, description = "Above-threshold list", body = Vec<diagnet_common::types::Reading>)
    )
)]
async fn temperature_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> Response {
    alert_scan(&state, Metric::Temperature, TEMPERATURE_ALERT_DEFAULT, query)
}

/// Readings above a vibration threshold within the look-back window.
#[utoipa::path(
    get,
    path = "/data/alerts/vibration",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(AlertQuery),
    responses(
        (status = 200, description = "Above-threshold list", body = Vec<diagnet_common::types::Reading>)
    )
)]
async fn vibration_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> Response {
    alert_scan(&state, Metric::Vibration, VIBRATION_ALERT_DEFAULT, query)
}

fn alert_scan(
    state: &AppState,
    metric: Metric,
    default_threshold: f64,
    query: AlertQuery,
) -> Response {
    let threshold = query.threshold.unwrap_or(default_threshold);
    let hours = query.hours.unwrap_or(ALERT_HOURS_DEFAULT);
    let since = Utc::now() - Duration::hours(hours as i64);
    match state
        .store
        .scan_above_threshold(metric, threshold, since, SCAN_CAP)
    {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Temperature aggregate for one machine over a time range.
#[utoipa::path(
    get,
    path = "/data/machine/{id}/stats",
    tag = "Data",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Machine identifier"), RangeQuery),
    responses(
        (status = 200, description = "Aggregate statistics", body = MachineStats),
        (status = 400, description = "Invalid range", body = ApiError)
    )
)]
async fn machine_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                &rejection.body_text(),
            );
        }
    };

    if query.start >= query.end {
        return error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "start must be before end",
        );
    }

    let start = query.start.and_utc();
    let end = query.end.and_utc();
    match state.store.aggregate(&id, Metric::Temperature, start, end) {
        Ok(summary) => Json(MachineStats {
            machine_id: id,
            average_temperature: summary.avg,
            total_readings: summary.count,
            start,
            end,
        })
        .into_response(),
        Err(e) => store_error_response(&e),
    }
}

pub fn data_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(submit_reading))
        .routes(routes!(recent_readings))
        .routes(routes!(machine_readings))
        .routes(routes!(machine_recent_readings))
        .routes(routes!(machine_reading_count))
        .routes(routes!(range_readings))
        .routes(routes!(status_readings))
        .routes(routes!(temperature_alerts))
        .routes(routes!(vibration_alerts))
        .routes(routes!(machine_stats))
}
