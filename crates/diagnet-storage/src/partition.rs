use crate::error::{Result, StoreError};
use crate::PartitionInfo;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Width of one chunk. Matches the hypertable contract of 7-day partitions.
const CHUNK_DAYS: i64 = 7;

/// Chunk boundaries are aligned to this date (a Monday) so that the same
/// timestamp always lands in the same file regardless of process restarts.
fn chunk_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid anchor date")
}

const READINGS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS readings (
    machine_id TEXT NOT NULL,
    ts INTEGER NOT NULL,
    temperature REAL NOT NULL,
    vibration REAL NOT NULL,
    pressure REAL,
    humidity REAL,
    power_consumption REAL,
    rotation_speed REAL,
    status TEXT NOT NULL,
    location TEXT,
    metadata TEXT,
    ingested_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_readings_machine_ts
    ON readings(machine_id, ts DESC);
CREATE INDEX IF NOT EXISTS idx_readings_ts
    ON readings(ts DESC);
CREATE INDEX IF NOT EXISTS idx_readings_status
    ON readings(status);
";

/// Manages the 7-day SQLite chunk files under one data directory and a
/// cache of open connections. The cache Mutex serializes SQL access; WAL
/// mode keeps readers from blocking the writer.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
    compacted: Mutex<HashSet<String>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
            compacted: Mutex::new(HashSet::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start date of the chunk containing `ts`.
    pub fn chunk_start(ts: DateTime<Utc>) -> NaiveDate {
        let days = (ts.date_naive() - chunk_epoch()).num_days();
        chunk_epoch() + Duration::days(days.div_euclid(CHUNK_DAYS) * CHUNK_DAYS)
    }

    fn chunk_key(ts: DateTime<Utc>) -> String {
        Self::chunk_start(ts).format("%Y-%m-%d").to_string()
    }

    fn chunk_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    fn open_chunk(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(READINGS_SCHEMA)?;
        Ok(conn)
    }

    /// Returns the key of the chunk holding `ts`, creating the file and
    /// schema if it does not exist yet.
    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::chunk_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let path = self.chunk_path(&key);
            let existed = path.exists();
            let conn = self.open_chunk(&path)?;
            if !existed {
                tracing::info!(chunk = %key, "created new storage chunk");
            }
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_chunk<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conns = self.lock_connections();
        let conn = conns
            .get(key)
            .ok_or_else(|| StoreError::Unavailable(format!("chunk {key} not open")))?;
        f(conn)
    }

    /// Keys of existing chunks overlapping `[from, to]`, newest first.
    /// Chunks are loaded into the connection cache as a side effect.
    pub fn chunks_desc_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let first = Self::chunk_start(from);
        let last = Self::chunk_start(to);
        let mut keys = self.chunk_dates_on_disk()?;
        keys.retain(|(date, _)| *date >= first && *date <= last);
        keys.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, key) in &keys {
            self.ensure_open(key)?;
        }
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    /// Keys of every chunk on disk, newest first.
    pub fn all_chunks_desc(&self) -> Result<Vec<String>> {
        let mut keys = self.chunk_dates_on_disk()?;
        keys.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, key) in &keys {
            self.ensure_open(key)?;
        }
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    fn ensure_open(&self, key: &str) -> Result<bool> {
        let path = self.chunk_path(key);
        if !path.exists() {
            return Ok(false);
        }
        let mut conns = self.lock_connections();
        if !conns.contains_key(key) {
            conns.insert(key.to_string(), self.open_chunk(&path)?);
        }
        Ok(true)
    }

    fn chunk_dates_on_disk(&self) -> Result<Vec<(NaiveDate, String)>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    out.push((date, date_str.to_string()));
                }
            }
        }
        Ok(out)
    }

    /// Drops chunks that lie entirely before `cutoff` and returns the number
    /// of readings removed. A chunk covering `[start, start+7d)` qualifies
    /// only when `start+7d <= cutoff`, so no in-range row is ever lost.
    pub fn drop_chunks_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff_date = cutoff.date_naive();
        let mut dropped_rows = 0u64;

        for (start, key) in self.chunk_dates_on_disk()? {
            if start + Duration::days(CHUNK_DAYS) > cutoff_date {
                continue;
            }

            if self.ensure_open(&key)? {
                let rows: u64 = self.with_chunk(&key, |conn| {
                    let count: i64 =
                        conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
                    Ok(count as u64)
                })?;
                dropped_rows += rows;
            }

            // Drop the cached Connection first so the WAL checkpoints.
            {
                let mut conns = self.lock_connections();
                conns.remove(&key);
            }

            let db_path = self.chunk_path(&key);
            if let Err(e) = std::fs::remove_file(&db_path) {
                tracing::error!(chunk = %key, error = %e, "failed to remove chunk file");
                continue;
            }
            for suffix in ["-wal", "-shm"] {
                let aux = self.data_dir.join(format!("{key}.db{suffix}"));
                if aux.exists() {
                    if let Err(e) = std::fs::remove_file(&aux) {
                        tracing::warn!(path = %aux.display(), error = %e, "failed to remove aux file");
                    }
                }
            }

            tracing::info!(chunk = %key, "dropped expired chunk");
        }

        Ok(dropped_rows)
    }

    /// Compacts chunks entirely before `cutoff`: checkpoint-truncates the
    /// WAL and VACUUMs the file. Each chunk is compacted at most once per
    /// process lifetime; old chunks are immutable so once is enough.
    pub fn compact_chunks_before(&self, cutoff: DateTime<Utc>) -> Result<u32> {
        let cutoff_date = cutoff.date_naive();
        let mut compacted = 0u32;

        for (start, key) in self.chunk_dates_on_disk()? {
            if start + Duration::days(CHUNK_DAYS) > cutoff_date {
                continue;
            }
            {
                let done = self
                    .compacted
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if done.contains(&key) {
                    continue;
                }
            }
            if !self.ensure_open(&key)? {
                continue;
            }
            self.with_chunk(&key, |conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); VACUUM;")?;
                Ok(())
            })?;
            self.compacted
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(key.clone());
            tracing::info!(chunk = %key, "compacted chunk");
            compacted += 1;
        }

        Ok(compacted)
    }

    /// Inventory of chunks on disk, oldest first.
    pub fn list_chunk_info(&self) -> Result<Vec<PartitionInfo>> {
        let mut infos = Vec::new();
        for (date, key) in self.chunk_dates_on_disk()? {
            let path = self.chunk_path(&key);
            let metadata = std::fs::metadata(&path)?;
            infos.push((
                date,
                PartitionInfo {
                    start_date: key,
                    size_bytes: metadata.len(),
                    path: path.to_string_lossy().to_string(),
                },
            ));
        }
        infos.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(infos.into_iter().map(|(_, info)| info).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn chunk_start_is_stable_and_aligned() {
        // 2024-01-01 is the anchor; 2024-01-08 starts the next chunk.
        let ts = Utc.with_ymd_and_hms(2024, 1, 7, 23, 59, 59).unwrap();
        assert_eq!(
            PartitionManager::chunk_start(ts),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        assert_eq!(
            PartitionManager::chunk_start(ts),
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
        );
        // Dates before the anchor still land on a 7-day boundary.
        let ts = Utc.with_ymd_and_hms(2023, 12, 31, 12, 0, 0).unwrap();
        assert_eq!(
            PartitionManager::chunk_start(ts),
            NaiveDate::from_ymd_opt(2023, 12, 25).unwrap()
        );
    }

    #[test]
    fn same_week_shares_a_chunk() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        let monday = Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).unwrap();
        let sunday = Utc.with_ymd_and_hms(2025, 1, 12, 20, 0, 0).unwrap();
        let key_a = pm.get_or_create(monday).unwrap();
        let key_b = pm.get_or_create(sunday).unwrap();
        assert_eq!(key_a, key_b);

        let next_week = Utc.with_ymd_and_hms(2025, 1, 13, 0, 0, 0).unwrap();
        let key_c = pm.get_or_create(next_week).unwrap();
        assert_ne!(key_a, key_c);
    }

    #[test]
    fn drop_removes_only_fully_expired_chunks() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        let old = Utc::now() - Duration::days(30);
        let old_key = pm.get_or_create(old).unwrap();
        let now_key = pm.get_or_create(Utc::now()).unwrap();

        let dropped = pm.drop_chunks_before(Utc::now() - Duration::days(14)).unwrap();
        assert_eq!(dropped, 0, "empty chunk drops zero rows");
        assert!(!tmp.path().join(format!("{old_key}.db")).exists());
        assert!(tmp.path().join(format!("{now_key}.db")).exists());
    }

    #[test]
    fn drop_removes_wal_and_shm_files() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        let old = Utc::now() - Duration::days(30);
        let old_key = pm.get_or_create(old).unwrap();
        let wal = tmp.path().join(format!("{old_key}.db-wal"));
        let shm = tmp.path().join(format!("{old_key}.db-shm"));
        std::fs::write(&wal, b"wal").unwrap();
        std::fs::write(&shm, b"shm").unwrap();

        pm.drop_chunks_before(Utc::now() - Duration::days(14)).unwrap();
        assert!(!wal.exists());
        assert!(!shm.exists());
    }

    #[test]
    fn compact_skips_recent_chunks() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        pm.get_or_create(Utc::now() - Duration::days(60)).unwrap();
        pm.get_or_create(Utc::now()).unwrap();

        let n = pm.compact_chunks_before(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(n, 1);
        // Second pass is a no-op for the already-compacted chunk.
        let n = pm.compact_chunks_before(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(n, 0);
    }
}
