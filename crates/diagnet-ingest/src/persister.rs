use std::sync::Arc;
use std::time::Duration;

use diagnet_common::types::Reading;
use diagnet_storage::{ReadingStore, StoreError};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::metrics::IngestMetrics;
use crate::IngestConfig;

enum FlushOutcome {
    /// Batch persisted, or rejected by the store (fatal for those rows,
    /// counted, not retried).
    Done,
    /// Shutdown was requested and the grace window expired mid-retry.
    GraceExpired,
}

enum Wake {
    Item(Option<Reading>),
    Shutdown,
}

/// Single consumer of the ingest buffer. Flushes when `batch_max` readings
/// are queued or `batch_linger_ms` has elapsed since the oldest one, and
/// holds a failed batch across retries rather than re-enqueueing it.
pub struct Persister {
    store: Arc<dyn ReadingStore>,
    cfg: IngestConfig,
    metrics: Arc<IngestMetrics>,
}

impl Persister {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        cfg: IngestConfig,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            store,
            cfg,
            metrics,
        }
    }

    pub async fn run(
        self,
        mut rx: mpsc::Receiver<Reading>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let linger = Duration::from_millis(self.cfg.batch_linger_ms);
        tracing::info!(
            batch_max = self.cfg.batch_max,
            linger_ms = self.cfg.batch_linger_ms,
            "persister started"
        );

        loop {
            // Wait for the first reading of the next batch.
            let wake = tokio::select! {
                item = rx.recv() => Wake::Item(item),
                _ = shutdown.changed() => Wake::Shutdown,
            };
            let first = match wake {
                Wake::Shutdown => {
                    self.drain(rx, Vec::new()).await;
                    return;
                }
                // Channel closed without a shutdown signal (subscriber died).
                Wake::Item(None) => return,
                Wake::Item(Some(reading)) => reading,
            };

            let mut batch = Vec::with_capacity(self.cfg.batch_max);
            batch.push(first);
            let deadline = Instant::now() + linger;

            // Fill until the batch is full or the linger deadline passes.
            while batch.len() < self.cfg.batch_max {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    item = rx.recv() => match item {
                        Some(reading) => batch.push(reading),
                        None => break,
                    }
                }
            }

            match self.flush_with_retry(&batch, &mut shutdown).await {
                FlushOutcome::Done => {}
                FlushOutcome::GraceExpired => {
                    self.count_dropped(batch.len() as u64, &mut rx).await;
                    return;
                }
            }

            if *shutdown.borrow() {
                self.drain(rx, Vec::new()).await;
                return;
            }
        }
    }

    /// Retries transient store failures forever (1s..30s backoff). Once a
    /// shutdown signal is seen, retries continue only until the grace
    /// deadline.
    async fn flush_with_retry(
        &self,
        batch: &[Reading],
        shutdown: &mut watch::Receiver<bool>,
    ) -> FlushOutcome {
        let mut backoff = Backoff::store_retry();
        let mut grace_deadline = self.grace_deadline_if_signalled(shutdown);

        loop {
            match self.store.append_batch(batch) {
                Ok(written) => {
                    IngestMetrics::add(&self.metrics.persisted, written);
                    tracing::debug!(count = written, "batch persisted");
                    return FlushOutcome::Done;
                }
                Err(StoreError::Rejected(reason)) => {
                    IngestMetrics::add(&self.metrics.store_rejected, batch.len() as u64);
                    tracing::error!(count = batch.len(), %reason, "store rejected batch");
                    return FlushOutcome::Done;
                }
                Err(StoreError::Unavailable(reason)) => {
                    IngestMetrics::incr(&self.metrics.store_retries);
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        %reason,
                        delay_ms = delay.as_millis() as u64,
                        "store unavailable, will retry batch"
                    );

                    if let Some(deadline) = grace_deadline {
                        if Instant::now() + delay >= deadline {
                            return FlushOutcome::GraceExpired;
                        }
                        tokio::time::sleep(delay).await;
                    } else {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => {
                                grace_deadline = Some(
                                    Instant::now()
                                        + Duration::from_secs(self.cfg.shutdown_grace_s),
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    fn grace_deadline_if_signalled(&self, shutdown: &watch::Receiver<bool>) -> Option<Instant> {
        if *shutdown.borrow() {
            Some(Instant::now() + Duration::from_secs(self.cfg.shutdown_grace_s))
        } else {
            None
        }
    }

    /// Drains the remaining buffered readings after a shutdown signal,
    /// bounded by the grace window. Whatever cannot be persisted in time is
    /// counted as shutdown_dropped.
    async fn drain(&self, mut rx: mpsc::Receiver<Reading>, mut pending: Vec<Reading>) {
        let deadline =
            Instant::now() + Duration::from_secs(self.cfg.shutdown_grace_s);
        rx.close();
        while let Some(reading) = rx.recv().await {
            pending.push(reading);
        }

        if pending.is_empty() {
            tracing::info!("persister drained, buffer empty");
            return;
        }
        tracing::info!(count = pending.len(), "draining buffered readings");

        let mut flushed = 0usize;
        for chunk in pending.chunks(self.cfg.batch_max) {
            if !self.flush_until(chunk, deadline).await {
                break;
            }
            flushed += chunk.len();
        }

        let dropped = (pending.len() - flushed) as u64;
        if dropped > 0 {
            IngestMetrics::add(&self.metrics.shutdown_dropped, dropped);
            tracing::warn!(dropped, "grace window expired, dropping buffered readings");
        } else {
            tracing::info!(count = flushed, "persister drained");
        }
    }

    /// Flush one batch, retrying transient failures until `deadline`.
    async fn flush_until(&self, batch: &[Reading], deadline: Instant) -> bool {
        let mut backoff = Backoff::store_retry();
        loop {
            match self.store.append_batch(batch) {
                Ok(written) => {
                    IngestMetrics::add(&self.metrics.persisted, written);
                    return true;
                }
                Err(StoreError::Rejected(reason)) => {
                    IngestMetrics::add(&self.metrics.store_rejected, batch.len() as u64);
                    tracing::error!(count = batch.len(), %reason, "store rejected batch");
                    return true;
                }
                Err(StoreError::Unavailable(reason)) => {
                    IngestMetrics::incr(&self.metrics.store_retries);
                    let delay = backoff.next_delay();
                    if Instant::now() + delay >= deadline {
                        tracing::warn!(%reason, "store still unavailable at grace deadline");
                        return false;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Counts an unflushed in-hand batch plus everything left in the buffer.
    async fn count_dropped(&self, in_hand: u64, rx: &mut mpsc::Receiver<Reading>) {
        let mut dropped = in_hand;
        rx.close();
        while rx.recv().await.is_some() {
            dropped += 1;
        }
        IngestMetrics::add(&self.metrics.shutdown_dropped, dropped);
        tracing::warn!(dropped, "grace window expired, dropping buffered readings");
    }
}
