//! AI orchestration engine
//!
//! Admission control and cost governance in front of a metered model API:
//! - per-caller loop detection feeding a three-state circuit breaker
//! - daily token/cost budget with a sticky downgrade to a cheaper model
//! - bounded call history that every report is derived from

pub mod alerts;
pub mod budget;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod loop_detector;
pub mod models;
pub mod orchestrator;
pub mod pricing;
pub mod reports;
pub mod ring_buffer;

pub use budget::{BudgetDecision, BudgetTracker, DailyTotals};
pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BudgetConfig, ConfigUpdate};
pub use loop_detector::{CallPatternIndex, LoopKind, LoopVerdict};
pub use models::{
    Admission, Alert, AlertCategory, AlertSeverity, BreakerState, CallRecord, CallReport, Priority,
};
pub use orchestrator::OrchestrationEngine;
pub use reports::{
    AlertsReport, BatchSuggestion, BudgetStatus, CronJob, EngineConfigView, EngineStatus,
    ResetOutcome, ResetRequest, RollingMetrics, ScheduleReport, UsageLogEntry, UsageReport,
};

use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

impl EngineError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
