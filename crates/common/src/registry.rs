//! SQLite-backed run history

use crate::types::{RunConfig, RunRecord, RunStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Durable, append-only store of completed run records.
#[derive(Clone)]
pub struct RunRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl RunRegistry {
    /// Open or create the registry at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        registry.init_schema()?;

        info!("Opened run registry at {:?}", path.as_ref());
        Ok(registry)
    }

    /// Open an in-memory registry (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                config TEXT NOT NULL,
                region TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            CREATE INDEX IF NOT EXISTS idx_runs_region ON runs(region);
            "#,
        )?;

        debug!("Run registry schema initialized");
        Ok(())
    }

    /// Append a completed run record. Records are never updated afterwards.
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO runs (run_id, status, started_at, duration_ms, config, region)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.run_id,
                serde_json::to_string(&record.status)?,
                record.timestamp.timestamp_millis(),
                record.duration_ms as i64,
                serde_json::to_string(&record.config)?,
                record.region,
            ],
        )?;

        debug!("Appended run {} ({})", record.run_id, record.status);
        Ok(())
    }

    /// Get a run record by id
    pub fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT run_id, status, started_at, duration_ms, config, region
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                RawRun::from_row,
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    /// Most recently started run, if any
    pub fn latest(&self) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT run_id, status, started_at, duration_ms, config, region
                 FROM runs ORDER BY started_at DESC, rowid DESC LIMIT 1",
                [],
                RawRun::from_row,
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    /// All run records, newest first
    pub fn list(&self) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT run_id, status, started_at, duration_ms, config, region
             FROM runs ORDER BY started_at DESC, rowid DESC",
        )?;

        let rows = stmt.query_map([], RawRun::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }

        Ok(results)
    }

    /// Delete everything but the newest `keep` records. Returns the number
    /// of records removed.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let conn = self.conn.lock();

        let removed = conn.execute(
            "DELETE FROM runs WHERE rowid NOT IN (
                 SELECT rowid FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1
             )",
            params![keep as i64],
        )?;

        if removed > 0 {
            debug!("Pruned {} run record(s)", removed);
        }

        Ok(removed)
    }

    /// Number of stored records
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Raw database row before parsing
struct RawRun {
    run_id: String,
    status: String,
    started_at: i64,
    duration_ms: i64,
    config: String,
    region: Option<String>,
}

impl RawRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            status: row.get(1)?,
            started_at: row.get(2)?,
            duration_ms: row.get(3)?,
            config: row.get(4)?,
            region: row.get(5)?,
        })
    }

    fn parse(self) -> Result<RunRecord> {
        let status: RunStatus = serde_json::from_str(&self.status)?;
        let config: RunConfig = serde_json::from_str(&self.config)?;
        let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(self.started_at)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("bad timestamp in run {}", self.run_id))
            })?;

        Ok(RunRecord {
            run_id: self.run_id,
            status,
            timestamp,
            duration_ms: self.duration_ms as u64,
            config,
            region: self.region,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn record(run_id: &str, started_at_ms: i64, status: RunStatus) -> RunRecord {
        let mut inputs = BTreeMap::new();
        inputs.insert("region".to_string(), "ZA".to_string());
        RunRecord {
            run_id: run_id.to_string(),
            status,
            timestamp: Utc.timestamp_millis_opt(started_at_ms).unwrap(),
            duration_ms: 1234,
            config: RunConfig {
                scripts: vec!["login".to_string()],
                inputs,
            },
            region: Some("ZA".to_string()),
        }
    }

    #[test]
    fn append_get_roundtrip() {
        let registry = RunRegistry::open_memory().unwrap();
        let rec = record("a", 1_000, RunStatus::Passed);
        registry.append(&rec).unwrap();

        let loaded = registry.get("a").unwrap().unwrap();
        assert_eq!(loaded.run_id, "a");
        assert_eq!(loaded.status, RunStatus::Passed);
        assert_eq!(loaded.config, rec.config);
        assert_eq!(loaded.region.as_deref(), Some("ZA"));
        assert_eq!(loaded.timestamp, rec.timestamp);

        assert!(registry.get("missing").unwrap().is_none());
    }

    #[test]
    fn latest_and_list_are_newest_first() {
        let registry = RunRegistry::open_memory().unwrap();
        registry.append(&record("a", 1_000, RunStatus::Passed)).unwrap();
        registry.append(&record("b", 2_000, RunStatus::Failed)).unwrap();

        assert_eq!(registry.latest().unwrap().unwrap().run_id, "b");

        let ids: Vec<String> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn duplicate_run_id_is_a_storage_error() {
        let registry = RunRegistry::open_memory().unwrap();
        registry.append(&record("a", 1_000, RunStatus::Passed)).unwrap();

        let err = registry.append(&record("a", 2_000, RunStatus::Failed));
        assert!(matches!(err, Err(Error::Storage(_))));

        // The original record is untouched
        assert_eq!(registry.get("a").unwrap().unwrap().status, RunStatus::Passed);
    }

    #[test]
    fn prune_keeps_newest() {
        let registry = RunRegistry::open_memory().unwrap();
        for i in 0..5 {
            registry
                .append(&record(&format!("r{}", i), 1_000 + i, RunStatus::Passed))
                .unwrap();
        }

        let removed = registry.prune(2).unwrap();
        assert_eq!(removed, 3);

        let ids: Vec<String> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(ids, vec!["r4".to_string(), "r3".to_string()]);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");

        {
            let registry = RunRegistry::open(&path).unwrap();
            registry.append(&record("a", 1_000, RunStatus::Failed)).unwrap();
        }

        let registry = RunRegistry::open(&path).unwrap();
        assert_eq!(registry.count().unwrap(), 1);
        assert_eq!(registry.latest().unwrap().unwrap().status, RunStatus::Failed);
    }
}
