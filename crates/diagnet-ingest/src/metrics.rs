use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

/// Pipeline counters, one per drop/retry reason. Shared between the
/// subscriber, the persister, and the HTTP health endpoint.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Messages delivered by the broker, before any validation.
    pub received: AtomicU64,
    /// Readings confirmed written by the store.
    pub persisted: AtomicU64,
    /// JSON decode failures.
    pub malformed_payload: AtomicU64,
    /// Schema or range violations.
    pub invalid_reading: AtomicU64,
    /// Cross-field quality rule rejections.
    pub quality_check_failed: AtomicU64,
    /// Topic machine id disagreed with the payload.
    pub identity_mismatch: AtomicU64,
    /// Valid readings dropped because the buffer was full.
    pub buffer_overflow: AtomicU64,
    /// Store append attempts that failed transiently and were retried.
    pub store_retries: AtomicU64,
    /// Readings discarded because the store rejected their rows.
    pub store_rejected: AtomicU64,
    /// Buffered readings discarded when the shutdown grace window expired.
    pub shutdown_dropped: AtomicU64,
}

impl IngestMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            malformed_payload: self.malformed_payload.load(Ordering::Relaxed),
            invalid_reading: self.invalid_reading.load(Ordering::Relaxed),
            quality_check_failed: self.quality_check_failed.load(Ordering::Relaxed),
            identity_mismatch: self.identity_mismatch.load(Ordering::Relaxed),
            buffer_overflow: self.buffer_overflow.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            store_rejected: self.store_rejected.load(Ordering::Relaxed),
            shutdown_dropped: self.shutdown_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters, as exposed on `/health`.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub persisted: u64,
    pub malformed_payload: u64,
    pub invalid_reading: u64,
    pub quality_check_failed: u64,
    pub identity_mismatch: u64,
    pub buffer_overflow: u64,
    pub store_retries: u64,
    pub store_rejected: u64,
    pub shutdown_dropped: u64,
}
