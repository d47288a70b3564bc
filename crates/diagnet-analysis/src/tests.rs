use crate::analyzer::Analyzer;
use crate::AnalysisConfig;
use chrono::{DateTime, Duration, TimeZone, Utc};
use diagnet_common::types::{
    AnomalyKind, AnomalySeverity, HealthStatus, MachineStatus, Reading,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap()
}

fn slice_from_temps(temps: &[f64]) -> Vec<Reading> {
    temps
        .iter()
        .enumerate()
        .map(|(i, &t)| Reading {
            machine_id: "M001".to_string(),
            timestamp: now() - Duration::hours(24) + Duration::minutes(i as i64),
            temperature: t,
            vibration: 0.4,
            pressure: None,
            humidity: None,
            power_consumption: None,
            rotation_speed: None,
            status: MachineStatus::Running,
            location: None,
            metadata: None,
            ingested_at: None,
        })
        .collect()
}

fn analyzer() -> Analyzer {
    Analyzer::new(AnalysisConfig::default())
}

#[test]
fn insufficient_data_below_min_points() {
    let slice = slice_from_temps(&[75.0, 75.0, 75.0]);
    let result = analyzer().analyze("M002", &slice, now());

    assert_eq!(result.status, HealthStatus::InsufficientData);
    assert_eq!(result.health_score, None);
    assert!(result.anomalies.is_empty());
    assert_eq!(result.statistics.data_points_analyzed, 3);
    assert_eq!(result.statistics.avg_temperature, None);
}

#[test]
fn empty_slice_is_insufficient() {
    let result = analyzer().analyze("M002", &[], now());
    assert_eq!(result.status, HealthStatus::InsufficientData);
    assert_eq!(result.statistics.data_points_analyzed, 0);
}

#[test]
fn critical_thresholds_drive_status_critical() {
    // Ten nominal readings plus two over the 100°C critical limit.
    let temps = [
        75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 105.0, 106.0,
    ];
    let result = analyzer().analyze("M001", &slice_from_temps(&temps), now());

    let criticals: Vec<_> = result
        .anomalies
        .iter()
        .filter(|a| a.severity == AnomalySeverity::Critical)
        .collect();
    assert_eq!(criticals.len(), 2);
    assert!(criticals
        .iter()
        .all(|a| a.kind == AnomalyKind::Temperature && a.threshold == 100.0));

    // The outliers sit under z=2.5 against this spread, so only the
    // threshold pass fires: 100 - 2*20 = 60, inside the WARNING bucket.
    let score = result.health_score.unwrap();
    assert_eq!(score, 60.0);
    assert_eq!(result.status, HealthStatus::Warning);
}

#[test]
fn z_score_only_anomaly_stays_healthy() {
    // 88°C is under temp_warn=90 but far from the tight 75° cluster.
    let temps = [
        75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 88.0,
    ];
    let result = analyzer().analyze("M001", &slice_from_temps(&temps), now());

    assert!(result
        .anomalies
        .iter()
        .all(|a| a.severity == AnomalySeverity::Warning));
    let z_anomalies: Vec<_> = result
        .anomalies
        .iter()
        .filter(|a| a.message.contains("Z-score"))
        .collect();
    assert!(!z_anomalies.is_empty(), "the 88° point must be z-flagged");
    assert!(z_anomalies.iter().any(|a| a.value == 88.0));
    assert!(result.health_score.unwrap() >= 95.0);
    assert_eq!(result.status, HealthStatus::Healthy);
}

#[test]
fn threshold_and_z_score_are_not_deduplicated() {
    // Nine tight readings plus one outlier: 105°C is both over the critical
    // limit and at z ≈ 2.85 against this distribution.
    let temps = [
        75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 105.0,
    ];
    let result = analyzer().analyze("M001", &slice_from_temps(&temps), now());

    let for_outlier: Vec<_> = result
        .anomalies
        .iter()
        .filter(|a| a.value == 105.0 && a.kind == AnomalyKind::Temperature)
        .collect();
    assert_eq!(
        for_outlier.len(),
        2,
        "one threshold anomaly and one z-score anomaly for the same reading"
    );
}

#[test]
fn warning_threshold_is_inclusive() {
    let mut cfg = AnalysisConfig::default();
    cfg.min_points = 2;
    // Exactly at temp_warn: flagged WARNING. Exactly at temp_crit: CRITICAL.
    let temps = [90.0, 100.0];
    let result = Analyzer::new(cfg).analyze("M001", &slice_from_temps(&temps), now());

    let severities: Vec<_> = result
        .anomalies
        .iter()
        .filter(|a| a.kind == AnomalyKind::Temperature)
        .map(|a| a.severity)
        .collect();
    assert!(severities.contains(&AnomalySeverity::Warning));
    assert!(severities.contains(&AnomalySeverity::Critical));
}

#[test]
fn vibration_thresholds_flag_independently() {
    let mut cfg = AnalysisConfig::default();
    cfg.min_points = 2;
    let mut slice = slice_from_temps(&[75.0, 75.0, 75.0]);
    slice[1].vibration = 0.75; // warn (>= 0.7)
    slice[2].vibration = 0.85; // crit (>= 0.8)
    let result = Analyzer::new(cfg).analyze("M001", &slice, now());

    let vib: Vec<_> = result
        .anomalies
        .iter()
        .filter(|a| a.kind == AnomalyKind::Vibration && !a.message.contains("Z-score"))
        .collect();
    assert_eq!(vib.len(), 2);
    assert!(vib.iter().any(|a| a.severity == AnomalySeverity::Warning));
    assert!(vib.iter().any(|a| a.severity == AnomalySeverity::Critical));
}

#[test]
fn constant_series_skips_z_score_pass() {
    let temps = [75.0; 12];
    let result = analyzer().analyze("M001", &slice_from_temps(&temps), now());
    assert!(result.anomalies.is_empty());
    assert_eq!(result.health_score, Some(100.0));
    assert_eq!(result.status, HealthStatus::Healthy);
}

#[test]
fn anomalies_ordered_by_detected_at_ascending() {
    let temps = [
        105.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 106.0,
    ];
    let result = analyzer().analyze("M001", &slice_from_temps(&temps), now());
    for pair in result.anomalies.windows(2) {
        assert!(pair[0].detected_at <= pair[1].detected_at);
    }
}

#[test]
fn analysis_is_deterministic_for_a_fixed_slice() {
    let temps = [
        75.0, 76.0, 74.0, 75.5, 75.0, 92.0, 75.0, 74.5, 101.0, 75.0, 75.0, 75.0,
    ];
    let slice = slice_from_temps(&temps);
    let a = analyzer().analyze("M001", &slice, now());
    let b = analyzer().analyze("M001", &slice, now());
    assert_eq!(a, b);
}

#[test]
fn health_score_arithmetic_and_buckets() {
    // Construct slices with a known number of threshold anomalies and a
    // constant-enough distribution that no z-scores fire (uniform spread).
    let mut cfg = AnalysisConfig::default();
    cfg.min_points = 10;
    cfg.z_threshold = 100.0; // effectively disable the z pass
    let analyzer = Analyzer::new(cfg);

    // 4 warnings: 100 - 4*5 = 80 -> HEALTHY boundary
    let temps = [
        92.0, 92.0, 92.0, 92.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0,
    ];
    let result = analyzer.analyze("M001", &slice_from_temps(&temps), now());
    assert_eq!(result.health_score, Some(80.0));
    assert_eq!(result.status, HealthStatus::Healthy);

    // 1 critical + 3 warnings: 100 - 20 - 15 = 65 -> WARNING
    let temps = [
        105.0, 92.0, 92.0, 92.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0,
    ];
    let result = analyzer.analyze("M001", &slice_from_temps(&temps), now());
    assert_eq!(result.health_score, Some(65.0));
    assert_eq!(result.status, HealthStatus::Warning);

    // 3 criticals: 100 - 60 = 40 -> CRITICAL
    let temps = [
        105.0, 105.0, 105.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0, 75.0,
    ];
    let result = analyzer.analyze("M001", &slice_from_temps(&temps), now());
    assert_eq!(result.health_score, Some(40.0));
    assert_eq!(result.status, HealthStatus::Critical);

    // Score clamps at zero: 6 criticals would be -20.
    let temps = [
        105.0, 105.0, 105.0, 105.0, 105.0, 105.0, 75.0, 75.0, 75.0, 75.0,
    ];
    let result = analyzer.analyze("M001", &slice_from_temps(&temps), now());
    assert_eq!(result.health_score, Some(0.0));
    assert_eq!(result.status, HealthStatus::Critical);
}

#[test]
fn statistics_reflect_the_slice() {
    let temps = [
        70.0, 80.0, 70.0, 80.0, 70.0, 80.0, 70.0, 80.0, 70.0, 80.0,
    ];
    let result = analyzer().analyze("M001", &slice_from_temps(&temps), now());
    let stats = &result.statistics;
    assert_eq!(stats.avg_temperature, Some(75.0));
    assert_eq!(stats.max_temperature, Some(80.0));
    assert_eq!(stats.avg_vibration, Some(0.4));
    assert_eq!(stats.max_vibration, Some(0.4));
    assert_eq!(stats.data_points_analyzed, 10);
}
