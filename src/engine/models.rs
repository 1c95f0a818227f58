//! Data models for the orchestration engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::pricing;

/// Priority of an AI-backed operation
///
/// Decides which operations survive an open breaker or an exhausted budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Self::Critical),
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,   // Normal operation
    Open,     // Tripped, only CRITICAL passes
    HalfOpen, // Trial calls after cooldown
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::Closed
    }
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    /// Numeric encoding exported on the state gauge
    pub fn gauge_value(&self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLOSED" => Ok(Self::Closed),
            "OPEN" => Ok(Self::Open),
            "HALF_OPEN" => Ok(Self::HalfOpen),
            other => Err(format!("unknown breaker state: {}", other)),
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// What part of the engine raised an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    LoopDetection,
    BudgetWarning,
    CircuitBreaker,
}

/// Alert emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub resolved: bool,
}

/// Usage reported after an AI-model call completed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReport {
    pub caller: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl CallReport {
    pub fn new(
        caller: impl Into<String>,
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        Self {
            caller: caller.into(),
            model: model.into(),
            input_tokens,
            output_tokens,
            session_id: None,
            priority: Priority::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Ring-buffer entry, immutable once created
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Monotonic sequence number assigned by the engine
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub caller: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub session_id: Option<String>,
    pub priority: Priority,
    /// Breaker state at the moment the call was recorded
    pub breaker_state: BreakerState,
}

impl CallRecord {
    pub fn new(
        seq: u64,
        report: CallReport,
        timestamp: DateTime<Utc>,
        breaker_state: BreakerState,
    ) -> Self {
        let cost_usd =
            pricing::estimate_cost(&report.model, report.input_tokens, report.output_tokens);
        Self {
            seq,
            timestamp,
            total_tokens: report.input_tokens.saturating_add(report.output_tokens),
            caller: report.caller,
            model: report.model,
            input_tokens: report.input_tokens,
            output_tokens: report.output_tokens,
            cost_usd,
            session_id: report.session_id,
            priority: report.priority,
            breaker_state,
        }
    }
}

/// Outcome of an admission decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Admission {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
        }
    }
}
