use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Operational status reported by the device itself. The platform never
/// rewrites it; a CRITICAL status with normal readings is a data-quality
/// problem, not something to correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum MachineStatus {
    Running,
    Idle,
    Warning,
    Critical,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Running => write!(f, "RUNNING"),
            MachineStatus::Idle => write!(f, "IDLE"),
            MachineStatus::Warning => write!(f, "WARNING"),
            MachineStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for MachineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(MachineStatus::Running),
            "IDLE" => Ok(MachineStatus::Idle),
            "WARNING" => Ok(MachineStatus::Warning),
            "CRITICAL" => Ok(MachineStatus::Critical),
            _ => Err(format!("unknown machine status: {s}")),
        }
    }
}

/// Raw reading as published on the broker or posted to `POST /data`
/// (wire format, camelCase).
///
/// Mirrors the JSON payload 1:1; no normalization happens here. The wire
/// `timestamp` carries no offset and is treated as UTC. Unknown fields are
/// ignored. Use [`RawReading::validate`](crate::validate) to produce a
/// [`Reading`] suitable for persistence.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    pub machine_id: String,
    /// ISO-8601 without timezone, e.g. `2025-11-12T22:49:27`; read as UTC.
    pub timestamp: NaiveDateTime,
    pub temperature: f64,
    pub vibration: f64,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub power_consumption: Option<f64>,
    #[serde(default)]
    pub rotation_speed: Option<f64>,
    /// Validated against [`MachineStatus`]; kept as a string so an unknown
    /// status is a validation failure, not a JSON decode failure.
    pub status: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A validated sensor sample. Identity is `(machine_id, timestamp)`;
/// duplicates are possible under at-least-once delivery and are persisted
/// as-is. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub machine_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub vibration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_consumption: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_speed: Option<f64>,
    pub status: MachineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Assigned by the store on insert; `None` until persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,
}

// Analysis result types

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySeverity::Warning => write!(f, "WARNING"),
            AnomalySeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnomalyKind {
    Temperature,
    Vibration,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::Temperature => write!(f, "TEMPERATURE"),
            AnomalyKind::Vibration => write!(f, "VIBRATION"),
        }
    }
}

/// A single flagged observation. A reading can legitimately produce both a
/// threshold anomaly and a z-score anomaly for the same metric; they are not
/// deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    InsufficientData,
}

/// Descriptive statistics over the analyzed slice. All fields except
/// `data_points_analyzed` are absent when the slice was too small to analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_vibration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_vibration: Option<f64>,
    pub data_points_analyzed: usize,
}

/// Health assessment for one machine over a recent window. Built per
/// request, returned, discarded; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub machine_id: String,
    pub analyzed_at: DateTime<Utc>,
    /// 0..=100, or `null` when the slice was smaller than the configured
    /// minimum.
    pub health_score: Option<f64>,
    pub status: HealthStatus,
    pub anomalies: Vec<Anomaly>,
    pub statistics: AnalysisStatistics,
}

// Auth DTOs

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub username: String,
    pub expires_in_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn raw_reading_parses_wire_shape() {
        let json = r#"{
            "machineId": "MACHINE-001",
            "timestamp": "2025-11-12T22:49:27",
            "temperature": 74.3,
            "vibration": 0.410,
            "pressure": 2.4,
            "humidity": 45.0,
            "powerConsumption": 152.0,
            "rotationSpeed": 1475,
            "status": "RUNNING",
            "location": "Factory Floor A"
        }"#;

        let raw: RawReading = serde_json::from_str(json).unwrap();
        assert_eq!(raw.machine_id, "MACHINE-001");
        assert_eq!(raw.temperature, 74.3);
        assert_eq!(raw.rotation_speed, Some(1475.0));
        assert_eq!(raw.status, "RUNNING");
        assert_eq!(raw.metadata, None);
    }

    #[test]
    fn raw_reading_ignores_unknown_fields() {
        let json = r#"{
            "machineId": "M001",
            "timestamp": "2025-01-01T00:00:00",
            "temperature": 75.0,
            "vibration": 0.4,
            "status": "RUNNING",
            "firmwareVersion": "2.1.0"
        }"#;

        let raw: RawReading = serde_json::from_str(json).unwrap();
        assert_eq!(raw.machine_id, "M001");
    }

    #[test]
    fn reading_serializes_utc_timestamps() {
        let reading = Reading {
            machine_id: "M001".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
            temperature: 75.0,
            vibration: 0.4,
            pressure: None,
            humidity: None,
            power_consumption: None,
            rotation_speed: None,
            status: MachineStatus::Running,
            location: None,
            metadata: None,
            ingested_at: None,
        };

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["machineId"], "M001");
        assert_eq!(json["status"], "RUNNING");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
        // Optional fields are omitted, not null
        assert!(json.get("pressure").is_none());
    }

    #[test]
    fn machine_status_round_trip() {
        for s in ["RUNNING", "IDLE", "WARNING", "CRITICAL"] {
            let status: MachineStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("running".parse::<MachineStatus>().is_err());
        assert!("MAINTENANCE".parse::<MachineStatus>().is_err());
    }

    #[test]
    fn health_status_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::InsufficientData).unwrap(),
            "\"INSUFFICIENT_DATA\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"HEALTHY\""
        );
    }
}
