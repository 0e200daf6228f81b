//! SqliteStore - durable Store backed by a single SQLite file.
//!
//! # Layout
//! - `retry_tasks`: one row per outstanding key, `status` column partitions
//!   Pending / Failed; payload is the JSON produced by `PayloadCodec`
//! - `schema_migrations`: applied schema versions
//!
//! Timestamps are stored as epoch milliseconds.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::domain::codec::PayloadCodec;
use crate::domain::errors::StoreError;
use crate::domain::record::{TaskRecord, TaskStatus};
use crate::domain::task::Task;
use crate::ports::Store;

const SCHEMA_VERSION: i64 = 1;

const SELECT_BY_STATUS: &str = "SELECT task_key, payload, created_at_ms, attempt_count, last_error,
            last_attempt_at_ms, next_eligible_at_ms
     FROM retry_tasks
     WHERE status = ?1
     ORDER BY COALESCE(next_eligible_at_ms, created_at_ms), task_key";

pub struct SqliteStore<T> {
    conn: Mutex<Option<Connection>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task> SqliteStore<T> {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(|e| backend("open sqlite store", e))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(|e| backend("enable wal", e))?;
        Self::from_connection(conn)
    }

    /// Non-durable variant, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| backend("open sqlite store", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| backend("set busy timeout", e))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            _marker: PhantomData,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, StoreError> {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        if guard.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }

    fn snapshot(&self, status: TaskStatus) -> Result<Vec<TaskRecord<T>>, StoreError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        let mut stmt = conn
            .prepare_cached(SELECT_BY_STATUS)
            .map_err(|e| backend("prepare snapshot", e))?;
        let rows = stmt
            .query_map(params![status.as_str()], RawRow::from_row)
            .map_err(|e| backend("query snapshot", e))?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| backend("read snapshot row", e))?;
            // An undecodable row must not wedge the whole queue.
            match raw.into_record(status) {
                Ok(record) => out.push(record),
                Err((key, e)) => {
                    tracing::error!(key = %key, error = %e, "skipping undecodable task row");
                }
            }
        }
        Ok(out)
    }
}

impl<T: Task> Store<T> for SqliteStore<T> {
    fn get_failed(&self) -> Result<Vec<TaskRecord<T>>, StoreError> {
        self.snapshot(TaskStatus::Failed)
    }

    fn get_pending(&self) -> Result<Vec<TaskRecord<T>>, StoreError> {
        self.snapshot(TaskStatus::Pending)
    }

    fn mark_pending(&self, record: &TaskRecord<T>) -> Result<(), StoreError> {
        let payload = PayloadCodec::encode(&record.task)?;
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        conn.execute(
            "INSERT INTO retry_tasks
               (task_key, status, payload, created_at_ms, attempt_count, last_error,
                last_attempt_at_ms, next_eligible_at_ms)
             VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6, NULL)
             ON CONFLICT(task_key) DO UPDATE SET
               payload = excluded.payload,
               attempt_count = CASE WHEN retry_tasks.status = 'pending'
                                    THEN retry_tasks.attempt_count ELSE 0 END,
               last_error = CASE WHEN retry_tasks.status = 'pending'
                                 THEN retry_tasks.last_error ELSE NULL END,
               last_attempt_at_ms = CASE WHEN retry_tasks.status = 'pending'
                                         THEN retry_tasks.last_attempt_at_ms ELSE NULL END,
               status = 'pending',
               next_eligible_at_ms = NULL",
            params![
                record.key().as_str(),
                payload,
                dt_to_ms(record.created_at),
                record.attempt_count,
                record.last_error,
                record.last_attempt_at.map(dt_to_ms),
            ],
        )
        .map_err(|e| backend("mark pending", e))?;
        Ok(())
    }

    fn mark_failed(&self, record: &TaskRecord<T>) -> Result<(), StoreError> {
        let payload = PayloadCodec::encode(&record.task)?;
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        conn.execute(
            "INSERT INTO retry_tasks
               (task_key, status, payload, created_at_ms, attempt_count, last_error,
                last_attempt_at_ms, next_eligible_at_ms)
             VALUES (?1, 'failed', ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(task_key) DO UPDATE SET
               status = 'failed',
               payload = excluded.payload,
               created_at_ms = excluded.created_at_ms,
               attempt_count = excluded.attempt_count,
               last_error = excluded.last_error,
               last_attempt_at_ms = excluded.last_attempt_at_ms,
               next_eligible_at_ms = excluded.next_eligible_at_ms",
            params![
                record.key().as_str(),
                payload,
                dt_to_ms(record.created_at),
                record.attempt_count,
                record.last_error,
                record.last_attempt_at.map(dt_to_ms),
                record.next_eligible_at.map(dt_to_ms),
            ],
        )
        .map_err(|e| backend("mark failed", e))?;
        Ok(())
    }

    fn mark_done(&self, record: &TaskRecord<T>) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        conn.execute(
            "DELETE FROM retry_tasks WHERE task_key = ?1",
            params![record.key().as_str()],
        )
        .map_err(|e| backend("mark done", e))?;
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let conn = guard.take().ok_or(StoreError::Closed)?;
        conn.close().map_err(|(_, e)| backend("close sqlite store", e))
    }
}

struct RawRow {
    key: String,
    payload: Vec<u8>,
    created_at_ms: i64,
    attempt_count: u32,
    last_error: Option<String>,
    last_attempt_at_ms: Option<i64>,
    next_eligible_at_ms: Option<i64>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            payload: row.get(1)?,
            created_at_ms: row.get(2)?,
            attempt_count: row.get(3)?,
            last_error: row.get(4)?,
            last_attempt_at_ms: row.get(5)?,
            next_eligible_at_ms: row.get(6)?,
        })
    }

    fn into_record<T: Task>(self, status: TaskStatus) -> Result<TaskRecord<T>, (String, StoreError)> {
        let task: T = PayloadCodec::decode(&self.payload).map_err(|e| (self.key.clone(), e.into()))?;
        Ok(TaskRecord {
            task,
            status,
            created_at: ms_to_dt(self.created_at_ms),
            attempt_count: self.attempt_count,
            last_error: self.last_error,
            last_attempt_at: self.last_attempt_at_ms.map(ms_to_dt),
            next_eligible_at: self.next_eligible_at_ms.map(ms_to_dt),
        })
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
           version INTEGER PRIMARY KEY,
           name TEXT NOT NULL,
           applied_at_ms INTEGER NOT NULL
         );",
    )
    .map_err(|e| backend("create migration table", e))?;

    let current: i64 = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .optional()
        .map_err(|e| backend("read schema version", e))?
        .flatten()
        .unwrap_or(0);

    if current > SCHEMA_VERSION {
        return Err(StoreError::Backend(format!(
            "sqlite store schema version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    if current < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS retry_tasks (
               task_key TEXT PRIMARY KEY,
               status TEXT NOT NULL CHECK (status IN ('pending', 'failed')),
               payload BLOB NOT NULL,
               created_at_ms INTEGER NOT NULL,
               attempt_count INTEGER NOT NULL DEFAULT 0,
               last_error TEXT,
               last_attempt_at_ms INTEGER,
               next_eligible_at_ms INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_retry_tasks_status ON retry_tasks(status);",
        )
        .map_err(|e| backend("apply migration v1", e))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at_ms) VALUES (?1, ?2, ?3)",
            params![1, "retry_tasks", dt_to_ms(Utc::now())],
        )
        .map_err(|e| backend("record migration v1", e))?;
    }
    Ok(())
}

fn backend(context: &str, e: rusqlite::Error) -> StoreError {
    StoreError::Backend(format!("{context}: {e}"))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
