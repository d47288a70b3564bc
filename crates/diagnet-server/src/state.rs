use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diagnet_analysis::analyzer::Analyzer;
use diagnet_common::validate::QualityRules;
use diagnet_ingest::{ConnectionStatus, IngestMetrics};
use diagnet_storage::ReadingStore;

use crate::identity::IdentityProvider;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReadingStore>,
    pub analyzer: Arc<Analyzer>,
    pub identity: Arc<dyn IdentityProvider>,
    pub ingest_metrics: Arc<IngestMetrics>,
    pub mqtt_status: Arc<ConnectionStatus>,
    pub quality: Arc<QualityRules>,
    pub jwt_secret: Arc<String>,
    pub token_ttl_ms: u64,
    /// Accepted clock skew for future-dated reading timestamps.
    pub clock_skew: chrono::Duration,
    pub request_timeout: Duration,
    pub start_time: DateTime<Utc>,
}
