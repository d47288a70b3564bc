use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use diagnet_common::types::Reading;
use diagnet_common::validate::{QualityRules, QualityViolation, ValidationError};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use utoipa::ToSchema;

use crate::backoff::Backoff;
use crate::metrics::IngestMetrics;
use crate::{IngestConfig, MqttConfig};

/// Subscriber lifecycle. Observable on `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Draining => write!(f, "draining"),
        }
    }
}

/// Shared view of the subscriber's connection state.
#[derive(Debug)]
pub struct ConnectionStatus(Mutex<ConnectionState>);

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self(Mutex::new(ConnectionState::Disconnected))
    }
}

impl ConnectionStatus {
    pub fn set(&self, state: ConnectionState) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    pub fn get(&self) -> ConnectionState {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Why a message was dropped instead of enqueued.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("invalid reading: {0}")]
    InvalidReading(#[from] ValidationError),

    #[error("quality check failed: {0}")]
    QualityCheckFailed(#[from] QualityViolation),

    #[error("identity mismatch: topic says '{topic_id}', payload says '{payload_id}'")]
    IdentityMismatch {
        topic_id: String,
        payload_id: String,
    },
}

/// Extracts the machine id from a `machine/<id>/data` topic. Topics of any
/// other shape carry no identity to cross-check.
pub(crate) fn topic_machine_id(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("machine"), Some(id), Some("data"), None) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// Parses `mqtt://host:port`, `tcp://host:port`, or bare `host:port`.
/// The port defaults to 1883 when absent.
pub(crate) fn parse_broker_url(url: &str) -> Result<(String, u16), String> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    if stripped.is_empty() {
        return Err(format!("invalid broker url: {url}"));
    }
    match stripped.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| format!("invalid broker port in: {url}"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((stripped.to_string(), 1883)),
    }
}

/// Decodes and validates one broker message against the reading invariants
/// and the identity of its topic.
pub fn process_message(
    topic: &str,
    payload: &[u8],
    quality: &QualityRules,
    clock_skew: chrono::Duration,
) -> Result<Reading, IngestError> {
    let raw: diagnet_common::types::RawReading = serde_json::from_slice(payload)?;

    if let Some(topic_id) = topic_machine_id(topic) {
        if topic_id != raw.machine_id {
            return Err(IngestError::IdentityMismatch {
                topic_id: topic_id.to_string(),
                payload_id: raw.machine_id,
            });
        }
    }

    let reading = raw.validate(Utc::now(), clock_skew)?;
    quality.check(&reading)?;
    Ok(reading)
}

/// Processes one publish and reports whether it should be acked.
///
/// Messages that fail decoding or validation are acked anyway: redelivery
/// would fail identically. A valid reading dropped on buffer overflow is
/// NOT acked, so the broker redelivers it once there is room again.
fn handle_publish(
    publish: &Publish,
    quality: &QualityRules,
    clock_skew: chrono::Duration,
    tx: &mpsc::Sender<Reading>,
    metrics: &IngestMetrics,
) -> bool {
    IngestMetrics::incr(&metrics.received);

    let reading = match process_message(&publish.topic, &publish.payload, quality, clock_skew) {
        Ok(reading) => reading,
        Err(err) => {
            match &err {
                IngestError::MalformedPayload(_) => {
                    IngestMetrics::incr(&metrics.malformed_payload);
                    tracing::debug!(topic = %publish.topic, error = %err, "dropping message");
                }
                IngestError::InvalidReading(_) => {
                    IngestMetrics::incr(&metrics.invalid_reading);
                    tracing::warn!(topic = %publish.topic, error = %err, "dropping message");
                }
                IngestError::QualityCheckFailed(_) => {
                    IngestMetrics::incr(&metrics.quality_check_failed);
                    tracing::warn!(topic = %publish.topic, error = %err, "dropping message");
                }
                IngestError::IdentityMismatch { .. } => {
                    IngestMetrics::incr(&metrics.identity_mismatch);
                    tracing::warn!(topic = %publish.topic, error = %err, "dropping message");
                }
            }
            return true;
        }
    };

    enqueue(reading, tx, metrics)
}

/// Pushes a validated reading into the buffer; drop-new on overflow.
fn enqueue(reading: Reading, tx: &mpsc::Sender<Reading>, metrics: &IngestMetrics) -> bool {
    match tx.try_send(reading) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            IngestMetrics::incr(&metrics.buffer_overflow);
            tracing::warn!(
                machine_id = %dropped.machine_id,
                "buffer full, dropping newest reading"
            );
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Owns the broker connection for the lifetime of the process. Resubscribes
/// on every ConnAck; reconnects with exponential backoff on loss.
pub async fn run_subscriber(
    mqtt: MqttConfig,
    ingest: IngestConfig,
    quality: Arc<QualityRules>,
    tx: mpsc::Sender<Reading>,
    metrics: Arc<IngestMetrics>,
    status: Arc<ConnectionStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (host, port) = match parse_broker_url(&mqtt.broker_url) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::error!(error = %e, "cannot start subscriber");
            return;
        }
    };

    let mut options = MqttOptions::new(mqtt.client_id.clone(), host, port);
    options.set_keep_alive(Duration::from_secs(mqtt.keepalive_s));
    options.set_clean_session(mqtt.clean_session);
    options.set_manual_acks(true);
    if let (Some(user), Some(pass)) = (&mqtt.username, &mqtt.password) {
        options.set_credentials(user.clone(), pass.clone());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 64);
    let clock_skew = chrono::Duration::seconds(ingest.clock_skew_s);
    let mut backoff = Backoff::reconnect();

    status.set(ConnectionState::Connecting);
    tracing::info!(broker = %mqtt.broker_url, topics = ?mqtt.topics, "starting MQTT subscriber");

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => None,
            event = eventloop.poll() => Some(event),
        };

        match event {
            None => break,
            Some(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                status.set(ConnectionState::Connected);
                backoff.reset();
                tracing::info!("connected to MQTT broker");
                for topic in &mqtt.topics {
                    match client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                        Ok(()) => tracing::info!(topic = %topic, "subscribed"),
                        Err(e) => {
                            tracing::warn!(topic = %topic, error = %e, "subscribe failed")
                        }
                    }
                }
            }
            Some(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                if handle_publish(&publish, &quality, clock_skew, &tx, &metrics) {
                    if let Err(e) = client.ack(&publish).await {
                        tracing::warn!(error = %e, "failed to ack message");
                    }
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                status.set(ConnectionState::Disconnected);
                if !mqtt.auto_reconnect {
                    tracing::error!(error = %e, "broker connection lost, reconnect disabled");
                    break;
                }
                let delay = backoff.next_delay();
                tracing::warn!(
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "broker connection lost, reconnecting"
                );
                status.set(ConnectionState::Connecting);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    // Stop accepting messages; the persister drains what is already
    // buffered. Dropping `tx` closes the channel.
    status.set(ConnectionState::Draining);
    let _ = client.disconnect().await;
    status.set(ConnectionState::Disconnected);
    tracing::info!("MQTT subscriber stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnet_common::types::MachineStatus;

    fn payload(machine_id: &str, status: &str, temp: f64) -> Vec<u8> {
        let ts = (Utc::now() - chrono::Duration::minutes(1))
            .naive_utc()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        serde_json::to_vec(&serde_json::json!({
            "machineId": machine_id,
            "timestamp": ts,
            "temperature": temp,
            "vibration": 0.4,
            "status": status,
        }))
        .unwrap()
    }

    fn skew() -> chrono::Duration {
        chrono::Duration::seconds(300)
    }

    #[test]
    fn topic_id_extraction() {
        assert_eq!(topic_machine_id("machine/M001/data"), Some("M001"));
        assert_eq!(topic_machine_id("machine//data"), None);
        assert_eq!(topic_machine_id("machine/M001/status"), None);
        assert_eq!(topic_machine_id("telemetry/M001/data"), None);
        assert_eq!(topic_machine_id("machine/M001/data/extra"), None);
    }

    #[test]
    fn broker_url_forms() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local:1883").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("tcp://10.0.0.5:11883").unwrap(),
            ("10.0.0.5".to_string(), 11883)
        );
        assert_eq!(
            parse_broker_url("localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert!(parse_broker_url("mqtt://host:notaport").is_err());
        assert!(parse_broker_url("").is_err());
    }

    #[test]
    fn process_accepts_matching_topic_and_payload() {
        let reading = process_message(
            "machine/M001/data",
            &payload("M001", "RUNNING", 75.0),
            &QualityRules::default(),
            skew(),
        )
        .unwrap();
        assert_eq!(reading.machine_id, "M001");
        assert_eq!(reading.status, MachineStatus::Running);
    }

    #[test]
    fn process_rejects_identity_mismatch() {
        let err = process_message(
            "machine/M002/data",
            &payload("M001", "RUNNING", 75.0),
            &QualityRules::default(),
            skew(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::IdentityMismatch { .. }));
    }

    #[test]
    fn process_skips_identity_check_for_other_topic_shapes() {
        assert!(process_message(
            "telemetry/all",
            &payload("M001", "RUNNING", 75.0),
            &QualityRules::default(),
            skew(),
        )
        .is_ok());
    }

    #[test]
    fn process_classifies_failures() {
        let err = process_message(
            "machine/M001/data",
            b"{not json",
            &QualityRules::default(),
            skew(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload(_)));

        let err = process_message(
            "machine/M001/data",
            &payload("M001", "RUNNING", 500.0),
            &QualityRules::default(),
            skew(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::InvalidReading(_)));

        // CRITICAL status with nominal readings trips the quality rule.
        let err = process_message(
            "machine/M001/data",
            &payload("M001", "CRITICAL", 30.0),
            &QualityRules::default(),
            skew(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::QualityCheckFailed(_)));
    }

    #[tokio::test]
    async fn rejected_messages_are_counted_and_still_acked() {
        use std::sync::atomic::Ordering;

        let metrics = IngestMetrics::default();
        let (tx, mut rx) = mpsc::channel(8);
        let quality = QualityRules::default();

        let cases: Vec<(Vec<u8>, fn(&IngestMetrics) -> u64)> = vec![
            (b"{broken".to_vec(), |m| {
                m.malformed_payload.load(Ordering::Relaxed)
            }),
            (payload("M001", "RUNNING", 999.0), |m| {
                m.invalid_reading.load(Ordering::Relaxed)
            }),
            (payload("M001", "CRITICAL", 20.0), |m| {
                m.quality_check_failed.load(Ordering::Relaxed)
            }),
            (payload("M002", "RUNNING", 75.0), |m| {
                m.identity_mismatch.load(Ordering::Relaxed)
            }),
        ];

        for (body, counter) in cases {
            let publish = Publish::new("machine/M001/data", rumqttc::QoS::AtLeastOnce, body);
            let before = counter(&metrics);
            let ack = handle_publish(&publish, &quality, skew(), &tx, &metrics);
            assert!(ack, "rejected messages are acked, not redelivered");
            assert_eq!(counter(&metrics), before + 1);
        }

        assert_eq!(metrics.received.load(Ordering::Relaxed), 4);
        assert!(rx.try_recv().is_err(), "nothing reached the buffer");
    }

    #[tokio::test]
    async fn overflow_drops_newest_and_counts() {
        let metrics = IngestMetrics::default();
        let (tx, mut rx) = mpsc::channel(2);
        let quality = QualityRules::default();

        let mut acked = 0;
        for i in 0..5 {
            let reading = process_message(
                "machine/M001/data",
                &payload("M001", "RUNNING", 70.0 + i as f64),
                &quality,
                skew(),
            )
            .unwrap();
            if enqueue(reading, &tx, &metrics) {
                acked += 1;
            }
        }

        // capacity 2: the first two got in, three overflowed
        assert_eq!(acked, 2);
        assert_eq!(
            metrics.buffer_overflow.load(std::sync::atomic::Ordering::Relaxed),
            3
        );
        // FIFO order preserved: oldest first
        assert_eq!(rx.recv().await.unwrap().temperature, 70.0);
        assert_eq!(rx.recv().await.unwrap().temperature, 71.0);
    }
}
