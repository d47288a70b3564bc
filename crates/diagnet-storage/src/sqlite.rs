use crate::error::Result;
use crate::partition::PartitionManager;
use crate::{AggregateSummary, Metric, PartitionInfo, ReadingStore};
use chrono::{DateTime, Duration, Utc};
use diagnet_common::types::{MachineStatus, Reading};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;

const SELECT_COLUMNS: &str = "machine_id, ts, temperature, vibration, pressure, humidity, \
     power_consumption, rotation_speed, status, location, metadata, ingested_at";

/// Cap applied to every scan regardless of the caller's limit. Keeps a
/// mistyped limit from materializing an entire chunk set in memory.
const HARD_SCAN_CAP: usize = 100_000;

pub struct SqliteReadingStore {
    chunks: PartitionManager,
}

impl SqliteReadingStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            chunks: PartitionManager::new(data_dir)?,
        })
    }

    /// Upper bound used when scanning "until now": readings may carry
    /// timestamps slightly ahead of the wall clock (skew tolerance), so the
    /// newest chunk is resolved with some slack.
    fn scan_upper_bound() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    fn query_chunk(
        &self,
        key: &str,
        where_clause: &str,
        params: &[&dyn rusqlite::types::ToSql],
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM readings WHERE {where_clause} \
             ORDER BY ts DESC LIMIT {limit}"
        );
        self.chunks.with_chunk(key, |conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut rows = stmt.query(params)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                if let Some(reading) = row_to_reading(row) {
                    out.push(reading);
                }
            }
            Ok(out)
        })
    }

    /// Runs `where_clause` against each chunk key in the given (newest-first)
    /// order, concatenating results until `limit` rows are collected. Chunks
    /// are time-disjoint, so per-chunk `ORDER BY ts DESC` concatenates into a
    /// globally descending sequence without a merge sort.
    fn scan_chunks_desc(
        &self,
        keys_desc: &[String],
        where_clause: &str,
        params: &[&dyn rusqlite::types::ToSql],
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let limit = limit.min(HARD_SCAN_CAP);
        let mut out: Vec<Reading> = Vec::new();
        for key in keys_desc {
            if out.len() >= limit {
                break;
            }
            let remaining = limit - out.len();
            out.extend(self.query_chunk(key, where_clause, params, remaining)?);
        }
        Ok(out)
    }
}

impl ReadingStore for SqliteReadingStore {
    fn append_batch(&self, readings: &[Reading]) -> Result<u64> {
        if readings.is_empty() {
            return Ok(0);
        }

        // A batch may straddle a chunk boundary; group rows by target chunk
        // so each chunk gets a single transaction.
        let mut by_chunk: HashMap<String, Vec<&Reading>> = HashMap::new();
        for reading in readings {
            let key = self.chunks.get_or_create(reading.timestamp)?;
            by_chunk.entry(key).or_default().push(reading);
        }

        let ingested_at = Utc::now();
        let mut written = 0u64;
        for (key, group) in by_chunk {
            self.chunks.with_chunk(&key, |conn| {
                insert_group(conn, &group, ingested_at)?;
                Ok(())
            })?;
            written += group.len() as u64;
        }
        Ok(written)
    }

    fn scan_machine(
        &self,
        machine_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let keys = self
            .chunks
            .chunks_desc_between(since, Self::scan_upper_bound())?;
        let since_ms = since.timestamp_millis();
        self.scan_chunks_desc(
            &keys,
            "machine_id = ?1 AND ts >= ?2",
            &[&machine_id, &since_ms],
            limit,
        )
    }

    fn scan_recent(&self, limit: usize) -> Result<Vec<Reading>> {
        let keys = self.chunks.all_chunks_desc()?;
        self.scan_chunks_desc(&keys, "1 = 1", &[], limit)
    }

    fn scan_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let keys = self.chunks.chunks_desc_between(start, end)?;
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        self.scan_chunks_desc(
            &keys,
            "ts >= ?1 AND ts <= ?2",
            &[&start_ms, &end_ms],
            limit,
        )
    }

    fn scan_status(&self, status: MachineStatus, limit: usize) -> Result<Vec<Reading>> {
        let keys = self.chunks.all_chunks_desc()?;
        let status_str = status.to_string();
        self.scan_chunks_desc(&keys, "status = ?1", &[&status_str], limit)
    }

    fn scan_above_threshold(
        &self,
        metric: Metric,
        min_value: f64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let keys = self
            .chunks
            .chunks_desc_between(since, Self::scan_upper_bound())?;
        let since_ms = since.timestamp_millis();
        let clause = format!("{} > ?1 AND ts >= ?2", metric.column());
        self.scan_chunks_desc(&keys, &clause, &[&min_value, &since_ms], limit)
    }

    fn aggregate(
        &self,
        machine_id: &str,
        metric: Metric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AggregateSummary> {
        let keys = self.chunks.chunks_desc_between(start, end)?;
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        let col = metric.column();
        let sql = format!(
            "SELECT MIN({col}), MAX({col}), AVG({col}), COUNT({col}) FROM readings \
             WHERE machine_id = ?1 AND ts >= ?2 AND ts <= ?3"
        );

        let mut total_count = 0u64;
        let mut weighted_sum = 0.0f64;
        let mut global_min: Option<f64> = None;
        let mut global_max: Option<f64> = None;

        for key in keys {
            self.chunks.with_chunk(&key, |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let (min_val, max_val, avg_val, count): (
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                    i64,
                ) = stmt.query_row(rusqlite::params![machine_id, start_ms, end_ms], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;

                if count > 0 {
                    if let Some(mn) = min_val {
                        global_min = Some(global_min.map_or(mn, |g: f64| g.min(mn)));
                    }
                    if let Some(mx) = max_val {
                        global_max = Some(global_max.map_or(mx, |g: f64| g.max(mx)));
                    }
                    if let Some(av) = avg_val {
                        weighted_sum += av * count as f64;
                    }
                    total_count += count as u64;
                }
                Ok(())
            })?;
        }

        Ok(AggregateSummary {
            avg: (total_count > 0).then(|| weighted_sum / total_count as f64),
            min: global_min,
            max: global_max,
            count: total_count,
        })
    }

    fn count_machine(&self, machine_id: &str) -> Result<u64> {
        let keys = self.chunks.all_chunks_desc()?;
        let mut total = 0u64;
        for key in keys {
            self.chunks.with_chunk(&key, |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM readings WHERE machine_id = ?1",
                    rusqlite::params![machine_id],
                    |row| row.get(0),
                )?;
                total += count as u64;
                Ok(())
            })?;
        }
        Ok(total)
    }

    fn drop_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.chunks.drop_chunks_before(cutoff)
    }

    fn compress_before(&self, cutoff: DateTime<Utc>) -> Result<u32> {
        self.chunks.compact_chunks_before(cutoff)
    }

    fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
        self.chunks.list_chunk_info()
    }
}

fn insert_group(
    conn: &Connection,
    group: &[&Reading],
    ingested_at: DateTime<Utc>,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO readings (machine_id, ts, temperature, vibration, pressure, humidity, \
             power_consumption, rotation_speed, status, location, metadata, ingested_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for reading in group {
            let metadata_json = reading
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            stmt.execute(rusqlite::params![
                &reading.machine_id,
                reading.timestamp.timestamp_millis(),
                reading.temperature,
                reading.vibration,
                reading.pressure,
                reading.humidity,
                reading.power_consumption,
                reading.rotation_speed,
                reading.status.to_string(),
                &reading.location,
                metadata_json,
                ingested_at.timestamp_millis(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn row_to_reading(row: &rusqlite::Row<'_>) -> Option<Reading> {
    let machine_id: String = row.get(0).ok()?;
    let ts_ms: i64 = row.get(1).ok()?;
    let status_str: String = row.get(8).ok()?;
    let metadata_str: Option<String> = row.get(10).ok()?;
    let ingested_ms: i64 = row.get(11).ok()?;

    let status: MachineStatus = match status_str.parse() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(machine_id = %machine_id, error = %e, "skipping row with bad status");
            return None;
        }
    };
    let metadata = metadata_str.and_then(|s| serde_json::from_str(&s).ok());

    Some(Reading {
        machine_id,
        timestamp: DateTime::from_timestamp_millis(ts_ms)?,
        temperature: row.get(2).ok()?,
        vibration: row.get(3).ok()?,
        pressure: row.get(4).ok()?,
        humidity: row.get(5).ok()?,
        power_consumption: row.get(6).ok()?,
        rotation_speed: row.get(7).ok()?,
        status,
        location: row.get(9).ok()?,
        metadata,
        ingested_at: DateTime::from_timestamp_millis(ingested_ms),
    })
}
