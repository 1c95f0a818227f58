//! SQLite usage log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::{PersistenceError, UsageLogRow, UsageSink};

const SCHEMA: &str = "BEGIN;
CREATE TABLE IF NOT EXISTS ai_usage_logs(
    id TEXT PRIMARY KEY,
    caller TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    total_tokens INTEGER NOT NULL,
    estimated_cost_usd REAL NOT NULL,
    session_id TEXT,
    priority TEXT NOT NULL,
    circuit_breaker_state TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ai_usage_logs_created_at ON ai_usage_logs(created_at);
CREATE INDEX IF NOT EXISTS idx_ai_usage_logs_caller ON ai_usage_logs(caller);
COMMIT;";

/// `ai_usage_logs` table in a SQLite file
///
/// rusqlite is blocking, so every statement runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteUsageSink {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteUsageSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened usage log database at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| PersistenceError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| PersistenceError::Join(e.to_string()))?
    }

    pub async fn count(&self) -> Result<u64, PersistenceError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(1) FROM ai_usage_logs", [], |r| r.get(0))?;
            Ok(n.max(0) as u64)
        })
        .await
    }

    /// Newest rows first
    pub async fn recent(&self, limit: usize) -> Result<Vec<UsageLogRow>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, caller, model, input_tokens, output_tokens, total_tokens,
                        estimated_cost_usd, session_id, priority, circuit_breaker_state, created_at
                 FROM ai_usage_logs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )?;
            let raw = stmt
                .query_map(params![limit], RawRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            raw.into_iter().map(RawRow::into_row).collect()
        })
        .await
    }
}

#[async_trait]
impl UsageSink for SqliteUsageSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn write(&self, row: &UsageLogRow) -> Result<(), PersistenceError> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO ai_usage_logs(
                    id, caller, model, input_tokens, output_tokens, total_tokens,
                    estimated_cost_usd, session_id, priority, circuit_breaker_state, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    row.id.to_string(),
                    row.caller,
                    row.model,
                    to_sql_int("input_tokens", row.input_tokens),
                    to_sql_int("output_tokens", row.output_tokens),
                    to_sql_int("total_tokens", row.total_tokens),
                    row.estimated_cost_usd,
                    row.session_id,
                    row.priority.as_str(),
                    row.circuit_breaker_state.as_str(),
                    row.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

/// SQLite integers are signed; larger counts are stored as `i64::MAX`
fn to_sql_int(column: &str, v: u64) -> i64 {
    i64::try_from(v).unwrap_or_else(|_| {
        warn!("Clamping {}={} to {} for SQLite", column, v, i64::MAX);
        i64::MAX
    })
}

/// Columns as stored, before parsing back into typed fields
struct RawRow {
    id: String,
    caller: String,
    model: String,
    input_tokens: i64,
    output_tokens: i64,
    total_tokens: i64,
    estimated_cost_usd: f64,
    session_id: Option<String>,
    priority: String,
    circuit_breaker_state: String,
    created_at: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            caller: row.get(1)?,
            model: row.get(2)?,
            input_tokens: row.get(3)?,
            output_tokens: row.get(4)?,
            total_tokens: row.get(5)?,
            estimated_cost_usd: row.get(6)?,
            session_id: row.get(7)?,
            priority: row.get(8)?,
            circuit_breaker_state: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_row(self) -> Result<UsageLogRow, PersistenceError> {
        let invalid = PersistenceError::InvalidRow;
        Ok(UsageLogRow {
            id: self.id.parse().map_err(|e: uuid::Error| invalid(e.to_string()))?,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| invalid(e.to_string()))?
                .with_timezone(&Utc),
            caller: self.caller,
            model: self.model,
            input_tokens: self.input_tokens.max(0) as u64,
            output_tokens: self.output_tokens.max(0) as u64,
            total_tokens: self.total_tokens.max(0) as u64,
            estimated_cost_usd: self.estimated_cost_usd,
            session_id: self.session_id,
            priority: self.priority.parse().map_err(invalid)?,
            circuit_breaker_state: self.circuit_breaker_state.parse().map_err(invalid)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::{BreakerState, CallRecord, CallReport, Priority};
    use chrono::Duration;
    use uuid::Uuid;

    fn row(seq: u64, caller: &str, at: DateTime<Utc>) -> UsageLogRow {
        let report = CallReport::new(caller, "claude-sonnet-4-0", 120, 80)
            .with_priority(Priority::High)
            .with_session("s-1");
        let record = CallRecord::new(seq, report, at, BreakerState::HalfOpen);
        UsageLogRow::from_record(&record, &Uuid::nil())
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let sink = SqliteUsageSink::open_in_memory().unwrap();
        let now = Utc::now();
        sink.write(&row(1, "feedback", now - Duration::seconds(5))).await.unwrap();
        sink.write(&row(2, "chatbot", now)).await.unwrap();

        assert_eq!(sink.count().await.unwrap(), 2);
        let rows = sink.recent(10).await.unwrap();
        assert_eq!(rows[0].caller, "chatbot");
        assert_eq!(rows[1].caller, "feedback");
        assert_eq!(rows[0].total_tokens, 200);
        assert_eq!(rows[0].priority, Priority::High);
        assert_eq!(rows[0].circuit_breaker_state, BreakerState::HalfOpen);
        assert_eq!(rows[0].session_id.as_deref(), Some("s-1"));
    }

    #[tokio::test]
    async fn test_oversized_token_counts_are_clamped() {
        let sink = SqliteUsageSink::open_in_memory().unwrap();
        let mut r = row(1, "bulk", Utc::now());
        r.input_tokens = u64::MAX;
        r.total_tokens = u64::MAX;
        sink.write(&r).await.unwrap();

        let stored = &sink.recent(1).await.unwrap()[0];
        assert_eq!(stored.input_tokens, i64::MAX as u64);
        assert_eq!(stored.total_tokens, i64::MAX as u64);
        assert_eq!(stored.output_tokens, 80);
        assert_eq!(to_sql_int("total_tokens", 42), 42);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_ignored() {
        let sink = SqliteUsageSink::open_in_memory().unwrap();
        let r = row(1, "feedback", Utc::now());
        sink.write(&r).await.unwrap();
        sink.write(&r).await.unwrap();
        assert_eq!(sink.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");
        {
            let sink = SqliteUsageSink::open(&path).unwrap();
            sink.write(&row(1, "patterns", Utc::now())).await.unwrap();
            assert_eq!(sink.path(), Some(path.as_path()));
        }
        let reopened = SqliteUsageSink::open(&path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }
}
