//! Concurrent MQTT ingestion pipeline: subscriber → validator → bounded
//! buffer → batching persister.
//!
//! The subscriber task owns the broker connection and feeds validated
//! readings into a bounded channel; a single persister task drains the
//! channel and writes batches to the store. Memory is bounded by the
//! channel capacity (overflow drops the newest message and counts it), and
//! every drop reason is observable through [`metrics::IngestMetrics`].

pub mod backoff;
pub mod metrics;
pub mod persister;
pub mod subscriber;

use std::sync::Arc;

use diagnet_common::validate::QualityRules;
use diagnet_storage::ReadingStore;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use subscriber::{ConnectionState, ConnectionStatus};

/// Broker connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker address, `mqtt://host:port`, `tcp://host:port`, or `host:port`.
    pub broker_url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_keepalive_s")]
    pub keepalive_s: u64,
}

fn default_client_id() -> String {
    "diagnet-ingest".to_string()
}

fn default_topics() -> Vec<String> {
    vec!["machine/+/data".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_keepalive_s() -> u64 {
    60
}

/// Buffering and persistence settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Max in-flight readings awaiting persistence.
    pub buffer_capacity: usize,
    /// Max readings per store append.
    pub batch_max: usize,
    /// Max wait before flushing a partial batch.
    pub batch_linger_ms: u64,
    /// Accepted clock skew for future-dated timestamps.
    pub clock_skew_s: i64,
    /// Drain window granted to the persister on shutdown.
    pub shutdown_grace_s: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            batch_max: 500,
            batch_linger_ms: 250,
            clock_skew_s: 300,
            shutdown_grace_s: 30,
        }
    }
}

/// Handles to the two pipeline tasks. Await both after signalling shutdown.
pub struct PipelineHandles {
    pub subscriber: JoinHandle<()>,
    pub persister: JoinHandle<()>,
}

/// Spawns the subscriber and persister tasks wired through a bounded
/// channel. `shutdown` flips to `true` exactly once; the subscriber stops
/// accepting messages and the persister drains within its grace window.
pub fn spawn_pipeline(
    mqtt: MqttConfig,
    ingest: IngestConfig,
    quality: Arc<QualityRules>,
    store: Arc<dyn ReadingStore>,
    ingest_metrics: Arc<IngestMetrics>,
    status: Arc<ConnectionStatus>,
    shutdown: watch::Receiver<bool>,
) -> PipelineHandles {
    let (tx, rx) = mpsc::channel(ingest.buffer_capacity);

    let subscriber = tokio::spawn(subscriber::run_subscriber(
        mqtt,
        ingest.clone(),
        quality,
        tx,
        Arc::clone(&ingest_metrics),
        status,
        shutdown.clone(),
    ));

    let persister = tokio::spawn(
        persister::Persister::new(store, ingest, ingest_metrics).run(rx, shutdown),
    );

    PipelineHandles {
        subscriber,
        persister,
    }
}
