//! Daily budget accounting and model downgrade policy
//!
//! Totals are always recomputed from the call buffer; the tracker only keeps
//! the downgrade state and the currently active model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::clock;
use super::config::BudgetConfig;
use super::models::Priority;
use super::ring_buffer::CallBuffer;

/// Floors applied to the limits before dividing
const MIN_TOKEN_LIMIT: f64 = 1.0;
const MIN_COST_LIMIT: f64 = 0.001;

/// Token and cost totals since midnight UTC
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DailyTotals {
    pub tokens: u64,
    pub cost_usd: f64,
    pub calls: usize,
}

impl DailyTotals {
    /// Scan the buffer for today's records
    pub fn from_buffer(buffer: &CallBuffer, now: DateTime<Utc>) -> Self {
        let today = clock::start_of_day(now);
        buffer
            .iter()
            .filter(|r| r.timestamp >= today)
            .fold(Self::default(), |mut acc, r| {
                acc.tokens = acc.tokens.saturating_add(r.total_tokens);
                acc.cost_usd += r.cost_usd;
                acc.calls += 1;
                acc
            })
    }

    /// Fraction of the tighter of the two limits already spent
    pub fn utilisation(&self, config: &BudgetConfig) -> f64 {
        let tokens = self.tokens as f64 / (config.daily_token_limit as f64).max(MIN_TOKEN_LIMIT);
        let cost = self.cost_usd / config.daily_cost_limit_usd.max(MIN_COST_LIMIT);
        tokens.max(cost)
    }

    pub fn is_exhausted(&self, config: &BudgetConfig) -> bool {
        self.tokens > config.daily_token_limit || self.cost_usd > config.daily_cost_limit_usd
    }

    pub fn tokens_remaining(&self, config: &BudgetConfig) -> u64 {
        config.daily_token_limit.saturating_sub(self.tokens)
    }

    pub fn cost_remaining(&self, config: &BudgetConfig) -> f64 {
        (config.daily_cost_limit_usd - self.cost_usd).max(0.0)
    }
}

/// Result of applying the budget policy to a recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetDecision {
    Within,
    /// The active model was just switched to the downgrade model
    Downgraded { utilisation: f64, model: String },
    /// Daily limit exceeded and the call is not CRITICAL
    Exhausted { message: String },
}

/// Active-model and downgrade state
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    active_model: String,
    downgraded: bool,
}

impl BudgetTracker {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            active_model: default_model.into(),
            downgraded: false,
        }
    }

    pub fn active_model(&self) -> &str {
        &self.active_model
    }

    pub fn is_downgraded(&self) -> bool {
        self.downgraded
    }

    /// Apply the hard-block and downgrade rules for a call that already happened
    pub fn evaluate(
        &mut self,
        totals: &DailyTotals,
        priority: Priority,
        config: &BudgetConfig,
    ) -> BudgetDecision {
        if let Some(message) = Self::exhausted_message(totals, priority, config) {
            return BudgetDecision::Exhausted { message };
        }

        let utilisation = totals.utilisation(config);
        if utilisation >= config.budget_warning_threshold && !self.downgraded {
            self.active_model = config.downgrade_model.clone();
            self.downgraded = true;
            return BudgetDecision::Downgraded {
                utilisation,
                model: self.active_model.clone(),
            };
        }

        BudgetDecision::Within
    }

    /// Read-only admission check
    pub fn check(
        totals: &DailyTotals,
        priority: Priority,
        config: &BudgetConfig,
    ) -> Option<String> {
        if totals.is_exhausted(config) && !priority.is_critical() {
            return Some("Daily budget exceeded.".to_string());
        }
        None
    }

    fn exhausted_message(
        totals: &DailyTotals,
        priority: Priority,
        config: &BudgetConfig,
    ) -> Option<String> {
        if !totals.is_exhausted(config) || priority.is_critical() {
            return None;
        }
        Some(format!(
            "Daily budget exceeded (tokens={}, cost=${:.4}). Only CRITICAL operations \
             are permitted until the next day.",
            totals.tokens, totals.cost_usd
        ))
    }

    /// CRITICAL always gets the default model
    pub fn recommended_model<'a>(
        &'a self,
        priority: Priority,
        config: &'a BudgetConfig,
    ) -> &'a str {
        if priority.is_critical() {
            &config.default_model
        } else {
            &self.active_model
        }
    }

    /// Drop the downgrade and go back to the default model
    pub fn restore(&mut self, default_model: &str) {
        self.downgraded = false;
        self.active_model = default_model.to_string();
    }

    /// Follow a new default model unless currently downgraded
    pub fn default_model_changed(&mut self, default_model: &str) {
        if !self.downgraded {
            self.active_model = default_model.to_string();
        }
    }
}
