//! Best-effort write-through of call records to durable storage
//!
//! `record_call` hands rows to a bounded queue and never waits on it. A single
//! worker drains the queue into a [`UsageSink`], bounding each write with a
//! timeout. Nothing that happens here is reported back to the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::models::{BreakerState, CallRecord, Priority};
use crate::engine::reports::usage_log_id;
use crate::metrics::METRICS;

pub mod sqlite;

pub use sqlite::SqliteUsageSink;

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection lock poisoned")]
    LockPoisoned,

    #[error("Storage task failed: {0}")]
    Join(String),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),
}

/// One row of the `ai_usage_logs` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub caller: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    pub session_id: Option<String>,
    pub priority: Priority,
    pub circuit_breaker_state: BreakerState,
}

impl UsageLogRow {
    pub fn from_record(record: &CallRecord, namespace: &Uuid) -> Self {
        Self {
            id: usage_log_id(namespace, record.seq),
            created_at: record.timestamp,
            caller: record.caller.clone(),
            model: record.model.clone(),
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            total_tokens: record.total_tokens,
            estimated_cost_usd: record.cost_usd,
            session_id: record.session_id.clone(),
            priority: record.priority,
            circuit_breaker_state: record.breaker_state,
        }
    }
}

/// Durable destination for usage rows
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Sink name for logs
    fn name(&self) -> &'static str;

    async fn write(&self, row: &UsageLogRow) -> Result<(), PersistenceError>;
}

/// Discards every row
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn write(&self, _row: &UsageLogRow) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Emits each row as a structured tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn write(&self, row: &UsageLogRow) -> Result<(), PersistenceError> {
        info!(
            target: "ai_usage",
            id = %row.id,
            caller = %row.caller,
            model = %row.model,
            input_tokens = row.input_tokens,
            output_tokens = row.output_tokens,
            cost_usd = row.estimated_cost_usd,
            priority = %row.priority,
            breaker = %row.circuit_breaker_state,
            "AI usage"
        );
        Ok(())
    }
}

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// SQLite database file; rows are only traced when unset
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,

    /// Rows buffered before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound for a single write
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_write_timeout_ms() -> u64 {
    5000
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            queue_capacity: default_queue_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl PersistenceSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Build the sink these settings describe
    pub fn open_sink(&self) -> Result<Arc<dyn UsageSink>, PersistenceError> {
        match &self.sqlite_path {
            Some(path) => Ok(Arc::new(SqliteUsageSink::open(path)?)),
            None => Ok(Arc::new(TracingUsageSink)),
        }
    }
}

/// Counters shared between the queue handle and its worker
#[derive(Debug, Default)]
pub struct PersistenceStats {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl PersistenceStats {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer side of the persistence queue
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<UsageLogRow>,
    stats: Arc<PersistenceStats>,
}

impl PersistenceHandle {
    /// Start the worker on the current tokio runtime
    pub fn spawn(sink: Arc<dyn UsageSink>, queue_capacity: usize, write_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let stats = Arc::new(PersistenceStats::default());
        info!(
            "Starting persistence worker: sink={}, queue_capacity={}, timeout={:?}",
            sink.name(),
            queue_capacity,
            write_timeout
        );
        tokio::spawn(run_worker(rx, sink, write_timeout, stats.clone()));
        Self { tx, stats }
    }

    pub fn from_settings(
        settings: &PersistenceSettings,
    ) -> Result<Self, PersistenceError> {
        let sink = settings.open_sink()?;
        Ok(Self::spawn(sink, settings.queue_capacity, settings.write_timeout()))
    }

    /// Queue a row without waiting; returns false when it was dropped
    pub fn enqueue(&self, row: UsageLogRow) -> bool {
        match self.tx.try_send(row) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(row)) => {
                warn!("Persistence queue full, dropping usage row {}", row.id);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                METRICS.record_persistence("dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(row)) => {
                warn!("Persistence worker stopped, dropping usage row {}", row.id);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                METRICS.record_persistence("dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> &PersistenceStats {
        &self.stats
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<UsageLogRow>,
    sink: Arc<dyn UsageSink>,
    write_timeout: Duration,
    stats: Arc<PersistenceStats>,
) {
    while let Some(row) = rx.recv().await {
        match tokio::time::timeout(write_timeout, sink.write(&row)).await {
            Ok(Ok(())) => {
                debug!("Persisted usage row {}", row.id);
                stats.written.fetch_add(1, Ordering::Relaxed);
                METRICS.record_persistence("success");
            }
            Ok(Err(e)) => {
                error!("Failed to persist usage row {} to {}: {}", row.id, sink.name(), e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
                METRICS.record_persistence("error");
            }
            Err(_) => {
                let e = PersistenceError::Timeout(write_timeout);
                error!("Failed to persist usage row {} to {}: {}", row.id, sink.name(), e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
                METRICS.record_persistence("timeout");
            }
        }
    }
    debug!("Persistence worker exiting");
}
