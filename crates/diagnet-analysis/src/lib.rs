//! On-demand statistical health assessment for one machine over a recent
//! window.
//!
//! The [`analyzer::Analyzer`] runs two independent detection passes over a
//! slice of readings: fixed absolute thresholds and standardized scores
//! (z-scores) against the slice's own distribution. Anomalies from both
//! passes feed a bounded health score. Nothing here is persisted; results
//! are built per request and discarded.

pub mod analyzer;
pub mod stats;

#[cfg(test)]
mod tests;

use serde::Deserialize;

/// Tunables for the detection passes. Defaults match the platform-wide
/// configuration defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Standardized-score cutoff; |z| above this flags a WARNING.
    pub z_threshold: f64,
    /// Below this many readings the result is INSUFFICIENT_DATA.
    pub min_points: usize,
    pub temp_warn: f64,
    pub temp_crit: f64,
    pub vib_warn: f64,
    pub vib_crit: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.5,
            min_points: 10,
            temp_warn: 90.0,
            temp_crit: 100.0,
            vib_warn: 0.7,
            vib_crit: 0.8,
        }
    }
}
