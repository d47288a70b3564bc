//! Time-partitioned storage for machine readings.
//!
//! The default implementation ([`sqlite::SqliteReadingStore`]) uses 7-day
//! time-partitioned SQLite chunk files with WAL mode for concurrent reads.
//! Callers see only the narrow [`ReadingStore`] interface; partitioning,
//! retention, and compaction are hidden behind it.

pub mod error;
pub mod partition;
pub mod sqlite;


use chrono::{DateTime, Utc};
use diagnet_common::types::{MachineStatus, Reading};

pub use error::{Result, StoreError};

/// A numeric reading column that can be threshold-scanned or aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Vibration,
    Pressure,
    Humidity,
    PowerConsumption,
    RotationSpeed,
}

impl Metric {
    /// Column name in the readings table. Fixed set; never derived from
    /// user input.
    pub fn column(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Vibration => "vibration",
            Metric::Pressure => "pressure",
            Metric::Humidity => "humidity",
            Metric::PowerConsumption => "power_consumption",
            Metric::RotationSpeed => "rotation_speed",
        }
    }
}

/// Aggregated statistics for one machine/metric over a time range.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct AggregateSummary {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: u64,
}

/// Information about one storage chunk (7-day SQLite partition file).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PartitionInfo {
    /// Start date of the 7-day period, `YYYY-MM-DD`.
    pub start_date: String,
    pub size_bytes: u64,
    pub path: String,
}

/// Persistence backend for readings.
///
/// Implementations must be `Send + Sync`: the store is shared between the
/// ingestion persister task and the REST handlers. Appends are durable
/// before returning `Ok`; a scan issued after a successful append sees the
/// appended rows. Duplicate `(machine_id, timestamp)` pairs are permitted
/// (at-least-once ingestion) and never deduplicated.
pub trait ReadingStore: Send + Sync {
    /// Bulk-inserts a batch. Ordering within the batch is irrelevant; the
    /// batch may span machines and chunks. Returns the number of rows
    /// written. [`StoreError::Unavailable`] is retryable;
    /// [`StoreError::Rejected`] is fatal for the batch.
    fn append_batch(&self, readings: &[Reading]) -> Result<u64>;

    /// Readings for one machine since `since`, newest first, at most `limit`.
    fn scan_machine(
        &self,
        machine_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>>;

    /// The newest readings across all machines.
    fn scan_recent(&self, limit: usize) -> Result<Vec<Reading>>;

    /// Cross-machine readings in `[start, end]`, newest first.
    fn scan_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>>;

    /// Readings with the given device-reported status, newest first.
    fn scan_status(&self, status: MachineStatus, limit: usize) -> Result<Vec<Reading>>;

    /// Readings where `metric` exceeds `min_value`, since `since`, newest
    /// first. Backs the alert endpoints.
    fn scan_above_threshold(
        &self,
        metric: Metric,
        min_value: f64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>>;

    /// Single-pass aggregate for one machine and metric over `[start, end]`.
    fn aggregate(
        &self,
        machine_id: &str,
        metric: Metric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AggregateSummary>;

    /// Total readings stored for one machine.
    fn count_machine(&self, machine_id: &str) -> Result<u64>;

    /// Retention primitive: drops chunks that lie entirely before `cutoff`
    /// and returns the number of readings dropped.
    fn drop_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Compacts chunks entirely before `cutoff` (VACUUM + WAL truncation).
    /// Returns the number of chunks compacted.
    fn compress_before(&self, cutoff: DateTime<Utc>) -> Result<u32>;

    /// Chunk inventory, oldest first.
    fn list_partitions(&self) -> Result<Vec<PartitionInfo>>;
}
