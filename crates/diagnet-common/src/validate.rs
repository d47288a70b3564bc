//! Reading validation: schema/range invariants plus the cross-field
//! data-quality heuristics.
//!
//! Range violations produce a field-scoped [`ValidationError`]; the quality
//! rules produce a [`QualityViolation`]. The two are kept apart because the
//! ingestion pipeline counts them separately.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::types::{MachineStatus, RawReading, Reading};

/// A reading that violates a schema or range invariant. Carries the field
/// name so HTTP callers get a field-scoped message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// A reading rejected by the cross-field quality heuristics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct QualityViolation {
    pub message: String,
}

/// Cross-field data-quality heuristics, overridable via configuration.
///
/// These catch readings that are internally inconsistent (a CRITICAL status
/// with nominal sensors, an IDLE machine running hot). They do not block
/// otherwise valid anomaly readings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityRules {
    /// CRITICAL status requires temperature >= this OR vibration >= the
    /// companion bound below; otherwise the reading is inconsistent.
    pub critical_min_temperature: f64,
    pub critical_min_vibration: f64,
    /// IDLE machines above this temperature are inconsistent.
    pub idle_max_temperature: f64,
    /// High vibration with temperature below this is logged as unusual but
    /// accepted.
    pub unusual_vibration: f64,
    pub unusual_min_temperature: f64,
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            critical_min_temperature: 50.0,
            critical_min_vibration: 0.5,
            idle_max_temperature: 80.0,
            unusual_vibration: 0.8,
            unusual_min_temperature: 40.0,
        }
    }
}

impl QualityRules {
    pub fn check(&self, reading: &Reading) -> Result<(), QualityViolation> {
        if reading.status == MachineStatus::Critical
            && reading.temperature < self.critical_min_temperature
            && reading.vibration < self.critical_min_vibration
        {
            return Err(QualityViolation {
                message: format!(
                    "machine {} reports CRITICAL but temperature {:.1}°C and vibration {:.2} are nominal",
                    reading.machine_id, reading.temperature, reading.vibration
                ),
            });
        }

        if reading.status == MachineStatus::Idle
            && reading.temperature > self.idle_max_temperature
        {
            return Err(QualityViolation {
                message: format!(
                    "machine {} is IDLE but temperature is {:.1}°C",
                    reading.machine_id, reading.temperature
                ),
            });
        }

        if reading.vibration > self.unusual_vibration
            && reading.temperature < self.unusual_min_temperature
        {
            // Vibration and temperature usually correlate; flag for
            // investigation but do not reject.
            tracing::warn!(
                machine_id = %reading.machine_id,
                vibration = reading.vibration,
                temperature = reading.temperature,
                "unusual reading: high vibration with low temperature"
            );
        }

        Ok(())
    }
}

fn valid_machine_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::new(field, "must be a finite number"));
    }
    if value < min || value > max {
        return Err(ValidationError::new(
            field,
            format!("must be between {min} and {max}, got {value}"),
        ));
    }
    Ok(())
}

fn check_optional_range(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    match value {
        Some(v) => check_range(field, v, min, max),
        None => Ok(()),
    }
}

impl RawReading {
    /// Validates the wire payload against the reading invariants and
    /// UTC-normalizes the timestamp. `now` is the receiver's clock;
    /// timestamps beyond `now + max_skew` are rejected as future-dated.
    ///
    /// The returned [`Reading`] has `ingested_at = None`; the store assigns
    /// it on insert.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        max_skew: Duration,
    ) -> Result<Reading, ValidationError> {
        if self.machine_id.is_empty() || self.machine_id.len() > 50 {
            return Err(ValidationError::new(
                "machineId",
                "must be between 1 and 50 characters",
            ));
        }
        if !valid_machine_id(&self.machine_id) {
            return Err(ValidationError::new(
                "machineId",
                "must start with an uppercase letter and contain only uppercase letters, digits, or '-'",
            ));
        }

        let timestamp = self.timestamp.and_utc();
        if timestamp > now + max_skew {
            return Err(ValidationError::new(
                "timestamp",
                format!("cannot be in the future (got {timestamp}, now {now})"),
            ));
        }

        check_range("temperature", self.temperature, -50.0, 200.0)?;
        check_range("vibration", self.vibration, 0.0, 1.0)?;
        check_optional_range("pressure", self.pressure, 0.0, 10.0)?;
        check_optional_range("humidity", self.humidity, 0.0, 100.0)?;
        check_optional_range("powerConsumption", self.power_consumption, 0.0, 10000.0)?;
        check_optional_range("rotationSpeed", self.rotation_speed, 0.0, 5000.0)?;

        let status: MachineStatus = self.status.parse().map_err(|_| {
            ValidationError::new(
                "status",
                "must be one of RUNNING, IDLE, WARNING, CRITICAL",
            )
        })?;

        if let Some(location) = &self.location {
            if location.len() > 100 {
                return Err(ValidationError::new(
                    "location",
                    "must be at most 100 characters",
                ));
            }
        }

        Ok(Reading {
            machine_id: self.machine_id.clone(),
            timestamp,
            temperature: self.temperature,
            vibration: self.vibration,
            pressure: self.pressure,
            humidity: self.humidity,
            power_consumption: self.power_consumption,
            rotation_speed: self.rotation_speed,
            status,
            location: self.location.clone(),
            metadata: self.metadata.clone(),
            ingested_at: None,
        })
    }
}
