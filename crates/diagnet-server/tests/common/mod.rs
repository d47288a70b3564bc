#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

use diagnet_analysis::analyzer::Analyzer;
use diagnet_analysis::AnalysisConfig;
use diagnet_common::types::{MachineStatus, Reading};
use diagnet_common::validate::QualityRules;
use diagnet_ingest::{ConnectionStatus, IngestMetrics};
use diagnet_server::config::UserEntry;
use diagnet_server::identity::{hash_password, StaticIdentityProvider};
use diagnet_server::state::AppState;
use diagnet_storage::sqlite::SqliteReadingStore;
use diagnet_storage::ReadingStore;

pub const TEST_SECRET: &str = "test-secret-test-secret-test-secret!";
pub const TEST_PASSWORD: &str = "changeme";

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub fn build_test_context() -> TestContext {
    let temp_dir = tempfile::tempdir().expect("tempdir should create");
    let store: Arc<dyn ReadingStore> =
        Arc::new(SqliteReadingStore::open(temp_dir.path()).expect("store should open"));

    let password_hash = hash_password(TEST_PASSWORD).expect("hash should compute");
    let identity = StaticIdentityProvider::from_entries(&[UserEntry {
        username: "admin".to_string(),
        password_hash,
    }]);

    let state = AppState {
        store,
        analyzer: Arc::new(Analyzer::new(AnalysisConfig::default())),
        identity: Arc::new(identity),
        ingest_metrics: Arc::new(IngestMetrics::default()),
        mqtt_status: Arc::new(ConnectionStatus::default()),
        quality: Arc::new(QualityRules::default()),
        jwt_secret: Arc::new(TEST_SECRET.to_string()),
        token_ttl_ms: 3_600_000,
        clock_skew: chrono::Duration::seconds(300),
        request_timeout: Duration::from_secs(10),
        start_time: Utc::now(),
    };

    let app = diagnet_server::app::build_http_app(state.clone());

    TestContext {
        temp_dir,
        state,
        app,
    }
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder = builder.header("Content-Type", "application/json");

    let req_body = body.map(|b| b.to_string()).unwrap_or_default();
    let req = builder
        .body(Body::from(req_body))
        .expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json)
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::empty()).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json)
}

pub async fn login_and_get_token(app: &axum::Router) -> String {
    let (status, body) = request_json(
        app,
        "POST",
        "/auth/login",
        None,
        Some(serde_json::json!({
            "username": "admin",
            "password": TEST_PASSWORD,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "login should succeed: {body}");
    body["token"]
        .as_str()
        .expect("token should exist")
        .to_string()
}

pub fn make_reading(machine_id: &str, ts: DateTime<Utc>, temp: f64, vib: f64) -> Reading {
    Reading {
        machine_id: machine_id.to_string(),
        timestamp: ts,
        temperature: temp,
        vibration: vib,
        pressure: None,
        humidity: None,
        power_consumption: None,
        rotation_speed: None,
        status: MachineStatus::Running,
        location: None,
        metadata: None,
        ingested_at: None,
    }
}

/// Seeds one reading per temperature, one minute apart, ending one minute
/// before now.
pub fn seed_temperatures(ctx: &TestContext, machine_id: &str, temps: &[f64]) {
    let base = Utc::now() - chrono::Duration::minutes(temps.len() as i64 + 1);
    let readings: Vec<Reading> = temps
        .iter()
        .enumerate()
        .map(|(i, &t)| make_reading(machine_id, base + chrono::Duration::minutes(i as i64), t, 0.4))
        .collect();
    ctx.state
        .store
        .append_batch(&readings)
        .expect("seed should append");
}
