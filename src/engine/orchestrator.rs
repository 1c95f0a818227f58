//! Orchestration engine: the single owner of all governance state
//!
//! Every public method takes the one engine lock for its whole critical
//! section. The only work done outside it is the persistence write (queued)
//! and the breaker cooldown, a detached task that re-takes the lock when it
//! fires and only acts if the trip it was armed for is still current.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::alerts::AlertLog;
use super::budget::{BudgetDecision, BudgetTracker, DailyTotals};
use super::circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig, TripEpoch};
use super::clock::{self, Clock};
use super::config::{BudgetConfig, ConfigUpdate};
use super::loop_detector::{CallPatternIndex, LoopVerdict};
use super::models::{
    Admission, AlertCategory, AlertSeverity, BreakerState, CallRecord, CallReport, Priority,
};
use super::reports::{
    self, AlertsReport, BatchSuggestion, BudgetStatus, EngineConfigView, EngineStatus,
    ResetOutcome, ResetRequest, RollingMetrics, ScheduleReport, UsageReport,
};
use super::ring_buffer::CallBuffer;
use super::EngineError;
use crate::metrics::METRICS;
use crate::persistence::{PersistenceHandle, PersistenceStats, UsageLogRow};

/// Everything guarded by the engine lock
struct EngineState {
    config: BudgetConfig,
    buffer: CallBuffer,
    patterns: CallPatternIndex,
    breaker: CircuitBreaker,
    budget: BudgetTracker,
    alerts: AlertLog,
    next_seq: u64,
}

impl EngineState {
    fn new(config: BudgetConfig) -> Self {
        Self {
            buffer: CallBuffer::new(config.buffer_capacity),
            patterns: CallPatternIndex::new(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                half_open_trial_calls: config.half_open_trial_calls,
            }),
            budget: BudgetTracker::new(config.default_model.clone()),
            alerts: AlertLog::new(config.max_alerts),
            next_seq: 0,
            config,
        }
    }

    fn alert(
        &mut self,
        now: DateTime<Utc>,
        severity: AlertSeverity,
        category: AlertCategory,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        self.alerts.push(now, severity, category, message, details);
    }
}

/// Process-wide admission-control and cost-governance service
///
/// Construct once at startup and share the returned `Arc`.
pub struct OrchestrationEngine {
    state: Arc<Mutex<EngineState>>,
    persistence: PersistenceHandle,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    /// Namespace for deterministic usage-log ids
    log_namespace: Uuid,
}

impl OrchestrationEngine {
    /// Create the engine; must be called inside a tokio runtime
    pub fn new(
        config: BudgetConfig,
        persistence: PersistenceHandle,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, EngineError> {
        config.validate()?;
        info!(
            "Initializing orchestration engine: token_limit={}, cost_limit=${:.2}, \
             default_model={}, downgrade_model={}",
            config.daily_token_limit,
            config.daily_cost_limit_usd,
            config.default_model,
            config.downgrade_model
        );
        METRICS.set_breaker_state(BreakerState::Closed);

        let started_at = clock.now();
        Ok(Arc::new(Self {
            state: Arc::new(Mutex::new(EngineState::new(config))),
            persistence,
            clock,
            started_at,
            log_namespace: Uuid::new_v4(),
        }))
    }

    /// Record a completed AI call and decide the consequences
    ///
    /// The record is buffered and queued for persistence before any policy runs,
    /// so the history is complete even for calls reported as disallowed.
    pub async fn record_call(&self, report: CallReport) -> Admission {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let seq = state.next_seq;
        state.next_seq += 1;
        let record = CallRecord::new(seq, report, now, state.breaker.state());
        let caller = record.caller.clone();
        let model = record.model.clone();
        let priority = record.priority;
        let total_tokens = record.total_tokens;
        let cost_usd = record.cost_usd;

        self.persistence
            .enqueue(UsageLogRow::from_record(&record, &self.log_namespace));
        state.buffer.push(record);

        debug!(
            "Recorded call: caller={}, model={}, tokens={}, cost=${:.6}, priority={}",
            caller, model, total_tokens, cost_usd, priority
        );

        let admission = self.apply_policy(&mut state, &caller, priority, total_tokens, now);
        METRICS.record_call(priority, admission.allowed, &model, total_tokens, cost_usd);
        admission
    }

    fn apply_policy(
        &self,
        state: &mut EngineState,
        caller: &str,
        priority: Priority,
        total_tokens: u64,
        now: DateTime<Utc>,
    ) -> Admission {
        // indexed even when the breaker denies; the call already happened
        let verdict = state.patterns.observe(caller, total_tokens, now, &state.config);

        if !state.breaker.permits(priority) {
            state.alert(
                now,
                AlertSeverity::Error,
                AlertCategory::CircuitBreaker,
                format!("Blocked {} (priority={}): breaker OPEN", caller, priority),
                None,
            );
            return Admission::deny(
                "Circuit breaker is OPEN. Only CRITICAL operations are allowed. \
                 Please wait or reset the breaker.",
            );
        }

        if let Some(verdict) = verdict {
            if state.breaker.state() != BreakerState::Open {
                self.trip_on_loop(state, caller, &verdict, now);
                return Admission::deny(verdict.message);
            }
        }

        let totals = DailyTotals::from_buffer(&state.buffer, now);
        match state.budget.evaluate(&totals, priority, &state.config) {
            BudgetDecision::Exhausted { message } => {
                warn!("{}", message);
                state.alert(
                    now,
                    AlertSeverity::Critical,
                    AlertCategory::BudgetWarning,
                    message.clone(),
                    Some(json!({
                        "tokens_used_today": totals.tokens,
                        "cost_used_today_usd": totals.cost_usd,
                    })),
                );
                return Admission::deny(message);
            }
            BudgetDecision::Downgraded { utilisation, model } => {
                let message = format!(
                    "Budget utilisation at {:.0}%. Switching non-critical operations to {}.",
                    utilisation * 100.0,
                    model
                );
                warn!("{}", message);
                state.alert(
                    now,
                    AlertSeverity::Warning,
                    AlertCategory::BudgetWarning,
                    message,
                    Some(json!({ "utilisation": utilisation, "model": model })),
                );
            }
            BudgetDecision::Within => {}
        }

        if state.breaker.record_success() {
            let default_model = state.config.default_model.clone();
            state.budget.restore(&default_model);
            state.alert(
                now,
                AlertSeverity::Info,
                AlertCategory::CircuitBreaker,
                "Circuit breaker returned to CLOSED after successful trial calls.",
                None,
            );
            METRICS.set_breaker_state(BreakerState::Closed);
            info!("Circuit breaker CLOSED after half-open trials");
        }

        Admission::allow()
    }

    fn trip_on_loop(
        &self,
        state: &mut EngineState,
        caller: &str,
        verdict: &LoopVerdict,
        now: DateTime<Utc>,
    ) {
        warn!("{}", verdict.message);
        state.alert(
            now,
            verdict.severity(),
            AlertCategory::LoopDetection,
            verdict.message.clone(),
            Some(json!({
                "caller": caller,
                "calls_in_window": verdict.calls_in_window,
                "reason": verdict.reason_label(),
            })),
        );

        let from = state.breaker.state();
        if let Some(epoch) = state.breaker.trip(now) {
            state.alert(
                now,
                AlertSeverity::Critical,
                AlertCategory::CircuitBreaker,
                format!("Circuit breaker tripped to OPEN: {}", verdict.message),
                Some(json!({ "from": from, "reason": verdict.reason_label() })),
            );
            error!("Circuit breaker OPEN ({} -> OPEN): {}", from, verdict.message);
            METRICS.record_trip(verdict.reason_label());
            METRICS.set_breaker_state(BreakerState::Open);
            self.arm_cooldown(epoch, state.config.breaker_cooldown());
        }
    }

    /// Schedule OPEN -> HALF_OPEN for the given trip
    fn arm_cooldown(&self, epoch: TripEpoch, cooldown: Duration) {
        let state: Weak<Mutex<EngineState>> = Arc::downgrade(&self.state);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let state = match state.upgrade() {
                Some(state) => state,
                None => return,
            };
            let mut state = state.lock().await;
            if state.breaker.cooldown_elapsed(epoch) {
                state.alert(
                    clock.now(),
                    AlertSeverity::Info,
                    AlertCategory::CircuitBreaker,
                    "Circuit breaker transitioned to HALF_OPEN. Next few calls will be trial calls.",
                    None,
                );
                METRICS.set_breaker_state(BreakerState::HalfOpen);
                info!("Circuit breaker moved to HALF_OPEN");
            } else {
                debug!("Stale breaker cooldown for epoch {} ignored", epoch);
            }
        });
    }

    /// Read-only pre-flight check
    pub async fn check_allowed(&self, caller: &str, priority: Priority) -> Admission {
        let now = self.clock.now();
        let state = self.state.lock().await;

        let admission = if !state.breaker.permits(priority) {
            Admission::deny("Circuit breaker OPEN -- call blocked.")
        } else {
            let totals = DailyTotals::from_buffer(&state.buffer, now);
            match BudgetTracker::check(&totals, priority, &state.config) {
                Some(reason) => Admission::deny(reason),
                None => Admission::allow(),
            }
        };

        if !admission.allowed {
            debug!("Pre-flight denied for {} (priority={})", caller, priority);
        }
        METRICS.record_admission(admission.allowed);
        admission
    }

    /// CRITICAL gets the default model, everything else the active one
    pub async fn get_recommended_model(&self, priority: Priority) -> String {
        let state = self.state.lock().await;
        state
            .budget
            .recommended_model(priority, &state.config)
            .to_string()
    }

    pub async fn get_status(&self) -> EngineStatus {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let totals = DailyTotals::from_buffer(&state.buffer, now);
        EngineStatus {
            circuit_breaker_state: state.breaker.state(),
            budget: BudgetStatus::new(&totals, &state.config),
            metrics: RollingMetrics::from_buffer(&state.buffer, now),
            active_model: state.budget.active_model().to_string(),
            downgraded: state.budget.is_downgraded(),
            engine_uptime_seconds: reports::uptime_seconds(self.started_at, now),
        }
    }

    pub async fn get_usage(&self, limit: usize) -> UsageReport {
        let now = self.clock.now();
        let state = self.state.lock().await;
        reports::usage_report(&state.buffer, now, limit, &self.log_namespace)
    }

    /// All alerts, newest first
    pub async fn get_alerts(&self) -> AlertsReport {
        let state = self.state.lock().await;
        AlertsReport {
            alerts: state.alerts.newest_first(),
            total: state.alerts.len(),
            unresolved_count: state.alerts.unresolved_count(),
        }
    }

    pub fn suggest_schedule(&self) -> ScheduleReport {
        reports::schedule_report()
    }

    pub async fn suggest_batching(&self) -> Vec<BatchSuggestion> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        reports::batch_suggestions(&state.buffer, now)
    }

    /// Partial config update, validated before anything changes
    pub async fn update_config(
        &self,
        update: ConfigUpdate,
    ) -> Result<EngineConfigView, EngineError> {
        update.validate()?;
        let mut state = self.state.lock().await;

        state.config.apply(&update);
        let trial_calls = state.config.half_open_trial_calls;
        state.breaker.set_trial_threshold(trial_calls);
        if let Some(default_model) = &update.default_model {
            state.budget.default_model_changed(default_model);
        }

        info!("Engine configuration updated: {:?}", update);
        Ok(EngineConfigView {
            config: state.config.clone(),
            updated: !update.is_empty(),
        })
    }

    /// Current effective configuration
    pub async fn config(&self) -> BudgetConfig {
        self.state.lock().await.config.clone()
    }

    /// Operator recovery action
    pub async fn reset(&self, request: ResetRequest) -> ResetOutcome {
        let mut state = self.state.lock().await;

        if request.reset_circuit_breaker {
            state.breaker.reset();
            let default_model = state.config.default_model.clone();
            state.budget.restore(&default_model);
            state.patterns.clear();
            METRICS.set_breaker_state(BreakerState::Closed);
            info!("Circuit breaker reset to CLOSED");
        }
        if request.clear_alerts {
            state.alerts.clear();
            info!("Alerts cleared");
        }
        if request.clear_usage_buffer {
            state.buffer.clear();
            info!("Usage buffer cleared");
        }

        ResetOutcome::new(
            request.reset_circuit_breaker,
            request.clear_alerts,
            request.clear_usage_buffer,
        )
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.state.lock().await.breaker.state()
    }

    pub async fn breaker_stats(&self) -> BreakerStats {
        self.state.lock().await.breaker.stats()
    }

    /// How long a denied caller should wait before retrying
    ///
    /// Breaker denials clear after the cooldown; budget denials only at the
    /// next UTC midnight.
    pub async fn retry_after_seconds(&self, priority: Priority) -> u64 {
        let now = self.clock.now();
        let state = self.state.lock().await;
        if state.breaker.permits(priority) {
            clock::seconds_until_next_day(now)
        } else {
            state.config.breaker_cooldown_seconds
        }
    }

    pub fn persistence_stats(&self) -> &PersistenceStats {
        self.persistence.stats()
    }
}
