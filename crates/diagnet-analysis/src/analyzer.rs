use crate::stats::DescriptiveStats;
use crate::AnalysisConfig;
use chrono::{DateTime, Utc};
use diagnet_common::types::{
    AnalysisResult, AnalysisStatistics, Anomaly, AnomalyKind, AnomalySeverity, HealthStatus,
    Reading,
};

const CRITICAL_PENALTY: f64 = 20.0;
const WARNING_PENALTY: f64 = 5.0;

pub struct Analyzer {
    cfg: AnalysisConfig,
}

impl Analyzer {
    pub fn new(cfg: AnalysisConfig) -> Self {
        Self { cfg }
    }

    /// Computes the health assessment for one machine from a slice of its
    /// readings. The result is a pure function of the slice and the
    /// configured thresholds; `now` only stamps `analyzed_at`.
    pub fn analyze(
        &self,
        machine_id: &str,
        readings: &[Reading],
        now: DateTime<Utc>,
    ) -> AnalysisResult {
        if readings.len() < self.cfg.min_points {
            tracing::debug!(
                machine_id,
                points = readings.len(),
                required = self.cfg.min_points,
                "not enough data for analysis"
            );
            return AnalysisResult {
                machine_id: machine_id.to_string(),
                analyzed_at: now,
                health_score: None,
                status: HealthStatus::InsufficientData,
                anomalies: Vec::new(),
                statistics: AnalysisStatistics {
                    avg_temperature: None,
                    max_temperature: None,
                    avg_vibration: None,
                    max_vibration: None,
                    data_points_analyzed: readings.len(),
                },
            };
        }

        let temperatures: Vec<f64> = readings.iter().map(|r| r.temperature).collect();
        let vibrations: Vec<f64> = readings.iter().map(|r| r.vibration).collect();
        // The slice is non-empty past the min_points gate.
        let temp_stats =
            DescriptiveStats::from_values(&temperatures).expect("non-empty slice");
        let vib_stats = DescriptiveStats::from_values(&vibrations).expect("non-empty slice");

        let mut anomalies = self.threshold_pass(readings);
        anomalies.extend(self.z_score_pass(readings, &temp_stats, &vib_stats));
        anomalies.sort_by_key(|a| a.detected_at);

        let health_score = health_score(&anomalies);
        let status = status_for(health_score);

        tracing::debug!(
            machine_id,
            health_score,
            anomalies = anomalies.len(),
            "analysis complete"
        );

        AnalysisResult {
            machine_id: machine_id.to_string(),
            analyzed_at: now,
            health_score: Some(health_score),
            status,
            anomalies,
            statistics: AnalysisStatistics {
                avg_temperature: Some(temp_stats.mean),
                max_temperature: Some(temp_stats.max),
                avg_vibration: Some(vib_stats.mean),
                max_vibration: Some(vib_stats.max),
                data_points_analyzed: readings.len(),
            },
        }
    }

    /// Absolute-threshold pass: each reading is compared against the fixed
    /// warn/crit limits for temperature and vibration. Ties are inclusive.
    fn threshold_pass(&self, readings: &[Reading]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        for r in readings {
            if r.temperature >= self.cfg.temp_crit {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::Temperature,
                    severity: AnomalySeverity::Critical,
                    value: r.temperature,
                    threshold: self.cfg.temp_crit,
                    message: format!("Temperature critically high: {}°C", r.temperature),
                    detected_at: r.timestamp,
                });
            } else if r.temperature >= self.cfg.temp_warn {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::Temperature,
                    severity: AnomalySeverity::Warning,
                    value: r.temperature,
                    threshold: self.cfg.temp_warn,
                    message: format!("Temperature warning: {}°C", r.temperature),
                    detected_at: r.timestamp,
                });
            }

            if r.vibration >= self.cfg.vib_crit {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::Vibration,
                    severity: AnomalySeverity::Critical,
                    value: r.vibration,
                    threshold: self.cfg.vib_crit,
                    message: format!("Vibration critically high: {}", r.vibration),
                    detected_at: r.timestamp,
                });
            } else if r.vibration >= self.cfg.vib_warn {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::Vibration,
                    severity: AnomalySeverity::Warning,
                    value: r.vibration,
                    threshold: self.cfg.vib_warn,
                    message: format!("Vibration warning: {}", r.vibration),
                    detected_at: r.timestamp,
                });
            }
        }

        anomalies
    }

    /// Standardized-score pass: a reading far from the slice's own mean is
    /// flagged even when it sits inside the absolute limits. Constant series
    /// (stddev 0) are skipped.
    fn z_score_pass(
        &self,
        readings: &[Reading],
        temp_stats: &DescriptiveStats,
        vib_stats: &DescriptiveStats,
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        for r in readings {
            if let Some(z) = temp_stats.z_score(r.temperature) {
                if z.abs() > self.cfg.z_threshold {
                    anomalies.push(Anomaly {
                        kind: AnomalyKind::Temperature,
                        severity: AnomalySeverity::Warning,
                        value: r.temperature,
                        threshold: temp_stats.mean + self.cfg.z_threshold * temp_stats.std_dev,
                        message: format!(
                            "Unusual temperature pattern detected (Z-score: {:.2})",
                            z.abs()
                        ),
                        detected_at: r.timestamp,
                    });
                }
            }

            if let Some(z) = vib_stats.z_score(r.vibration) {
                if z.abs() > self.cfg.z_threshold {
                    anomalies.push(Anomaly {
                        kind: AnomalyKind::Vibration,
                        severity: AnomalySeverity::Warning,
                        value: r.vibration,
                        threshold: vib_stats.mean + self.cfg.z_threshold * vib_stats.std_dev,
                        message: format!(
                            "Unusual vibration pattern detected (Z-score: {:.2})",
                            z.abs()
                        ),
                        detected_at: r.timestamp,
                    });
                }
            }
        }

        anomalies
    }
}

/// `100 − 20·critical − 5·warning`, clamped to `[0, 100]`.
fn health_score(anomalies: &[Anomaly]) -> f64 {
    let critical = anomalies
        .iter()
        .filter(|a| a.severity == AnomalySeverity::Critical)
        .count() as f64;
    let warning = anomalies
        .iter()
        .filter(|a| a.severity == AnomalySeverity::Warning)
        .count() as f64;

    (100.0 - critical * CRITICAL_PENALTY - warning * WARNING_PENALTY).clamp(0.0, 100.0)
}

fn status_for(score: f64) -> HealthStatus {
    if score >= 80.0 {
        HealthStatus::Healthy
    } else if score >= 50.0 {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    }
}
