//! Budget and policy configuration for the orchestration engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EngineError;

/// Runtime-tunable engine policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Tokens allowed per UTC day
    #[serde(default = "default_daily_token_limit")]
    pub daily_token_limit: u64,

    /// USD allowed per UTC day
    #[serde(default = "default_daily_cost_limit")]
    pub daily_cost_limit_usd: f64,

    /// Utilisation fraction at which non-critical work is downgraded
    #[serde(default = "default_warning_threshold")]
    pub budget_warning_threshold: f64,

    /// Model used for CRITICAL operations and normal operation
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Cheaper model substituted when approaching the budget
    #[serde(default = "default_downgrade_model")]
    pub downgrade_model: String,

    /// Calls per caller tolerated within the loop window
    #[serde(default = "default_loop_max_calls")]
    pub loop_max_calls: usize,

    /// Loop detection window in seconds
    #[serde(default = "default_loop_window_seconds")]
    pub loop_window_seconds: u64,

    /// Number of most recent calls compared by the stuck-loop heuristic
    #[serde(default = "default_stuck_loop_sample_size")]
    pub stuck_loop_sample_size: usize,

    /// Max relative deviation from the mean for calls to count as identical
    #[serde(default = "default_stuck_loop_variance")]
    pub stuck_loop_variance: f64,

    /// Successful trial calls needed to close a half-open breaker
    #[serde(default = "default_half_open_trial_calls")]
    pub half_open_trial_calls: u32,

    /// Time an open breaker waits before going half-open
    #[serde(default = "default_breaker_cooldown_seconds")]
    pub breaker_cooldown_seconds: u64,

    /// Ring buffer capacity
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Maximum retained alerts
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
}

fn default_daily_token_limit() -> u64 {
    500_000
}

fn default_daily_cost_limit() -> f64 {
    10.0
}

fn default_warning_threshold() -> f64 {
    0.80
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_downgrade_model() -> String {
    "claude-haiku-35".to_string()
}

fn default_loop_max_calls() -> usize {
    5
}

fn default_loop_window_seconds() -> u64 {
    60
}

fn default_stuck_loop_sample_size() -> usize {
    4
}

fn default_stuck_loop_variance() -> f64 {
    0.10
}

fn default_half_open_trial_calls() -> u32 {
    3
}

fn default_breaker_cooldown_seconds() -> u64 {
    60
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_max_alerts() -> usize {
    200
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_token_limit: default_daily_token_limit(),
            daily_cost_limit_usd: default_daily_cost_limit(),
            budget_warning_threshold: default_warning_threshold(),
            default_model: default_model(),
            downgrade_model: default_downgrade_model(),
            loop_max_calls: default_loop_max_calls(),
            loop_window_seconds: default_loop_window_seconds(),
            stuck_loop_sample_size: default_stuck_loop_sample_size(),
            stuck_loop_variance: default_stuck_loop_variance(),
            half_open_trial_calls: default_half_open_trial_calls(),
            breaker_cooldown_seconds: default_breaker_cooldown_seconds(),
            buffer_capacity: default_buffer_capacity(),
            max_alerts: default_max_alerts(),
        }
    }
}

impl BudgetConfig {
    /// Check every field against the bounds accepted by `update_config`
    pub fn validate(&self) -> Result<(), EngineError> {
        ConfigUpdate::from(self.clone()).validate()?;
        if self.buffer_capacity == 0 {
            return Err(EngineError::invalid("buffer_capacity", "must be at least 1"));
        }
        if self.max_alerts == 0 {
            return Err(EngineError::invalid("max_alerts", "must be at least 1"));
        }
        Ok(())
    }

    /// Apply an already validated partial update
    pub(crate) fn apply(&mut self, update: &ConfigUpdate) {
        if let Some(v) = update.daily_token_limit {
            self.daily_token_limit = v;
        }
        if let Some(v) = update.daily_cost_limit_usd {
            self.daily_cost_limit_usd = v;
        }
        if let Some(v) = update.budget_warning_threshold {
            self.budget_warning_threshold = v;
        }
        if let Some(v) = &update.default_model {
            self.default_model = v.clone();
        }
        if let Some(v) = &update.downgrade_model {
            self.downgrade_model = v.clone();
        }
        if let Some(v) = update.loop_max_calls {
            self.loop_max_calls = v;
        }
        if let Some(v) = update.loop_window_seconds {
            self.loop_window_seconds = v;
        }
        if let Some(v) = update.stuck_loop_sample_size {
            self.stuck_loop_sample_size = v;
        }
        if let Some(v) = update.stuck_loop_variance {
            self.stuck_loop_variance = v;
        }
        if let Some(v) = update.half_open_trial_calls {
            self.half_open_trial_calls = v;
        }
    }

    /// Loop window as Duration
    pub fn loop_window(&self) -> Duration {
        Duration::from_secs(self.loop_window_seconds)
    }

    /// Breaker cooldown as Duration
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_seconds)
    }
}

/// Partial configuration update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub daily_token_limit: Option<u64>,
    #[serde(default)]
    pub daily_cost_limit_usd: Option<f64>,
    #[serde(default, alias = "budget_warning_threshold_pct")]
    pub budget_warning_threshold: Option<f64>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub downgrade_model: Option<String>,
    #[serde(default, alias = "loop_detection_max_calls")]
    pub loop_max_calls: Option<usize>,
    #[serde(default, alias = "loop_detection_window_seconds")]
    pub loop_window_seconds: Option<u64>,
    #[serde(default)]
    pub stuck_loop_sample_size: Option<usize>,
    #[serde(default)]
    pub stuck_loop_variance: Option<f64>,
    #[serde(default)]
    pub half_open_trial_calls: Option<u32>,
}

impl ConfigUpdate {
    /// Reject out-of-range values before anything is mutated
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(v) = self.daily_token_limit {
            if v < 1000 {
                return Err(EngineError::invalid("daily_token_limit", "must be >= 1000"));
            }
        }
        if let Some(v) = self.daily_cost_limit_usd {
            if !v.is_finite() || v < 0.01 {
                return Err(EngineError::invalid("daily_cost_limit_usd", "must be >= 0.01"));
            }
        }
        if let Some(v) = self.budget_warning_threshold {
            if !(0.1..=1.0).contains(&v) {
                return Err(EngineError::invalid(
                    "budget_warning_threshold",
                    "must be between 0.1 and 1.0",
                ));
            }
        }
        if let Some(v) = &self.default_model {
            if v.trim().is_empty() {
                return Err(EngineError::invalid("default_model", "cannot be empty"));
            }
        }
        if let Some(v) = &self.downgrade_model {
            if v.trim().is_empty() {
                return Err(EngineError::invalid("downgrade_model", "cannot be empty"));
            }
        }
        if let Some(v) = self.loop_max_calls {
            if v < 2 {
                return Err(EngineError::invalid("loop_max_calls", "must be >= 2"));
            }
        }
        if let Some(v) = self.loop_window_seconds {
            if v < 10 {
                return Err(EngineError::invalid("loop_window_seconds", "must be >= 10"));
            }
        }
        if let Some(v) = self.stuck_loop_sample_size {
            if v < 2 {
                return Err(EngineError::invalid("stuck_loop_sample_size", "must be >= 2"));
            }
        }
        if let Some(v) = self.stuck_loop_variance {
            if !(v > 0.0 && v < 1.0) {
                return Err(EngineError::invalid(
                    "stuck_loop_variance",
                    "must be between 0 and 1 (exclusive)",
                ));
            }
        }
        if let Some(v) = self.half_open_trial_calls {
            if v < 1 {
                return Err(EngineError::invalid("half_open_trial_calls", "must be >= 1"));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<BudgetConfig> for ConfigUpdate {
    fn from(config: BudgetConfig) -> Self {
        Self {
            daily_token_limit: Some(config.daily_token_limit),
            daily_cost_limit_usd: Some(config.daily_cost_limit_usd),
            budget_warning_threshold: Some(config.budget_warning_threshold),
            default_model: Some(config.default_model),
            downgrade_model: Some(config.downgrade_model),
            loop_max_calls: Some(config.loop_max_calls),
            loop_window_seconds: Some(config.loop_window_seconds),
            stuck_loop_sample_size: Some(config.stuck_loop_sample_size),
            stuck_loop_variance: Some(config.stuck_loop_variance),
            half_open_trial_calls: Some(config.half_open_trial_calls),
        }
    }
}
