//! Read-only reporting views derived from the call buffer
//!
//! Everything here is a pure function of engine state and a clock instant, so
//! repeated calls with no new records in between produce identical output.

use chrono::{DateTime, Duration, Timelike, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::budget::DailyTotals;
use super::clock;
use super::config::BudgetConfig;
use super::models::{Alert, BreakerState, CallRecord, Priority};
use super::ring_buffer::CallBuffer;

/// Callers with at least this many calls in the batching window get a suggestion
pub const BATCH_MIN_CALLS: usize = 3;
const BATCH_WINDOW_MINUTES: i64 = 5;
const EST_TOKENS_PER_CALL: u64 = 3000;
const EST_TOKENS_PER_BATCH: u64 = 5000;

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Stable id for a buffered record, shared with the persisted row
pub fn usage_log_id(namespace: &Uuid, seq: u64) -> Uuid {
    Uuid::new_v5(namespace, &seq.to_be_bytes())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingMetrics {
    pub tokens_per_minute: f64,
    pub tokens_per_hour: f64,
    pub tokens_per_day: f64,
    pub cost_per_day_usd: f64,
    pub total_calls_today: usize,
}

impl RollingMetrics {
    pub fn from_buffer(buffer: &CallBuffer, now: DateTime<Utc>) -> Self {
        let minute_ago = now - Duration::minutes(1);
        let hour_ago = now - Duration::hours(1);
        let today = clock::start_of_day(now);

        let mut tokens_1m = 0u64;
        let mut tokens_1h = 0u64;
        let mut tokens_day = 0u64;
        let mut cost_day = 0.0;
        let mut calls_today = 0;

        for record in buffer.iter() {
            if record.timestamp >= today {
                tokens_day = tokens_day.saturating_add(record.total_tokens);
                cost_day += record.cost_usd;
                calls_today += 1;
            }
            if record.timestamp >= hour_ago {
                tokens_1h = tokens_1h.saturating_add(record.total_tokens);
            }
            if record.timestamp >= minute_ago {
                tokens_1m = tokens_1m.saturating_add(record.total_tokens);
            }
        }

        Self {
            tokens_per_minute: tokens_1m as f64,
            tokens_per_hour: tokens_1h as f64,
            tokens_per_day: tokens_day as f64,
            cost_per_day_usd: round_to(cost_day, 6),
            total_calls_today: calls_today,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub daily_token_limit: u64,
    pub daily_cost_limit_usd: f64,
    pub tokens_used_today: u64,
    pub cost_used_today_usd: f64,
    pub tokens_remaining: u64,
    pub cost_remaining_usd: f64,
    pub utilisation_pct: f64,
}

impl BudgetStatus {
    pub fn new(totals: &DailyTotals, config: &BudgetConfig) -> Self {
        Self {
            daily_token_limit: config.daily_token_limit,
            daily_cost_limit_usd: config.daily_cost_limit_usd,
            tokens_used_today: totals.tokens,
            cost_used_today_usd: round_to(totals.cost_usd, 6),
            tokens_remaining: totals.tokens_remaining(config),
            cost_remaining_usd: round_to(totals.cost_remaining(config), 6),
            utilisation_pct: round_to(totals.utilisation(config) * 100.0, 2),
        }
    }
}

/// Snapshot returned by `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub circuit_breaker_state: BreakerState,
    pub budget: BudgetStatus,
    pub metrics: RollingMetrics,
    pub active_model: String,
    pub downgraded: bool,
    pub engine_uptime_seconds: f64,
}

pub(crate) fn uptime_seconds(started_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - started_at).num_milliseconds().max(0);
    round_to(millis as f64 / 1000.0, 2)
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyUsage {
    pub hour: String,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub call_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointUsage {
    pub caller: String,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub call_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub call_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub caller: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub priority: Priority,
    pub circuit_breaker_state: BreakerState,
}

impl UsageLogEntry {
    pub fn from_record(record: &CallRecord, namespace: &Uuid) -> Self {
        Self {
            id: usage_log_id(namespace, record.seq),
            timestamp: record.timestamp,
            caller: record.caller.clone(),
            model: record.model.clone(),
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            total_tokens: record.total_tokens,
            estimated_cost_usd: round_to(record.cost_usd, 6),
            session_id: record.session_id.clone(),
            priority: record.priority,
            circuit_breaker_state: record.breaker_state,
        }
    }
}

/// Report returned by `get_usage`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub hourly: Vec<HourlyUsage>,
    pub daily_total_tokens: u64,
    pub daily_total_cost_usd: f64,
    pub by_endpoint: Vec<EndpointUsage>,
    pub by_model: Vec<ModelUsage>,
    pub recent_logs: Vec<UsageLogEntry>,
}

#[derive(Default)]
struct Bucket {
    tokens: u64,
    cost: f64,
    count: usize,
}

impl Bucket {
    fn add(&mut self, record: &CallRecord) {
        self.tokens = self.tokens.saturating_add(record.total_tokens);
        self.cost += record.cost_usd;
        self.count += 1;
    }
}

/// Sort by tokens descending; the stable sort keeps first-seen order on ties
fn by_tokens_desc(map: IndexMap<String, Bucket>) -> Vec<(String, Bucket)> {
    let mut entries: Vec<(String, Bucket)> = map.into_iter().collect();
    entries.sort_by(|a, b| b.1.tokens.cmp(&a.1.tokens));
    entries
}

pub fn usage_report(
    buffer: &CallBuffer,
    now: DateTime<Utc>,
    limit: usize,
    namespace: &Uuid,
) -> UsageReport {
    let today = clock::start_of_day(now);

    let mut hourly: [Option<Bucket>; 24] = Default::default();
    let mut endpoints: IndexMap<String, Bucket> = IndexMap::new();
    let mut models: IndexMap<String, Bucket> = IndexMap::new();
    let mut daily = Bucket::default();

    for record in buffer.iter() {
        if record.timestamp >= today {
            hourly[record.timestamp.hour() as usize]
                .get_or_insert_with(Bucket::default)
                .add(record);
            daily.add(record);
        }
        endpoints.entry(record.caller.clone()).or_default().add(record);
        models.entry(record.model.clone()).or_default().add(record);
    }

    let hourly = hourly
        .iter()
        .enumerate()
        .filter_map(|(hour, bucket)| {
            bucket.as_ref().map(|b| HourlyUsage {
                hour: format!("{:02}:00", hour),
                total_tokens: b.tokens,
                total_cost_usd: round_to(b.cost, 6),
                call_count: b.count,
            })
        })
        .collect();

    let by_endpoint = by_tokens_desc(endpoints)
        .into_iter()
        .map(|(caller, b)| EndpointUsage {
            caller,
            total_tokens: b.tokens,
            total_cost_usd: round_to(b.cost, 6),
            call_count: b.count,
        })
        .collect();

    let by_model = by_tokens_desc(models)
        .into_iter()
        .map(|(model, b)| ModelUsage {
            model,
            total_tokens: b.tokens,
            total_cost_usd: round_to(b.cost, 6),
            call_count: b.count,
        })
        .collect();

    let recent_logs = buffer
        .tail(limit)
        .map(|r| UsageLogEntry::from_record(r, namespace))
        .collect();

    UsageReport {
        hourly,
        daily_total_tokens: daily.tokens,
        daily_total_cost_usd: round_to(daily.cost, 6),
        by_endpoint,
        by_model,
        recent_logs,
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsReport {
    pub alerts: Vec<Alert>,
    pub total: usize,
    pub unresolved_count: usize,
}

// ---------------------------------------------------------------------------
// Schedule advisory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub name: String,
    pub description: String,
    pub cron_expression: String,
    pub timezone: String,
    pub priority: Priority,
    pub estimated_tokens_per_run: u64,
    pub estimated_daily_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub recommended_jobs: Vec<CronJob>,
    pub estimated_daily_token_total: u64,
    pub estimated_daily_cost_usd: f64,
    pub notes: Vec<String>,
}

const SCHEDULE_TZ: &str = "Asia/Hong_Kong";

// name, description, cron, priority, tokens per run, daily cost
const RECOMMENDED_JOBS: &[(&str, &str, &str, Priority, u64, f64)] = &[
    (
        "gmail_sync_business_hours",
        "Sync Gmail inbox during business hours (09:00-18:00 HKT). \
         Checks for new client emails and extracts feedback.",
        "*/15 9-17 * * 1-5",
        Priority::Medium,
        2000,
        0.36,
    ),
    (
        "gmail_sync_off_hours",
        "Sync Gmail inbox during off-hours at a reduced frequency to conserve token budget.",
        "0 0-8,18-23 * * *",
        Priority::Low,
        1500,
        0.14,
    ),
    (
        "feedback_analysis_batch",
        "Batch-process pending feedback items every 30 minutes: sentiment, topics and requirements.",
        "*/30 * * * *",
        Priority::High,
        5000,
        1.44,
    ),
    (
        "health_score_recalculation",
        "Recalculate client health scores every 6 hours from recent feedback, \
         project status and engagement.",
        "0 */6 * * *",
        Priority::Medium,
        8000,
        0.38,
    ),
    (
        "pattern_detection_cross_client",
        "Daily cross-client pattern detection at 3 AM HKT for recurring themes \
         and error patterns.",
        "0 3 * * *",
        Priority::Low,
        25000,
        0.45,
    ),
    (
        "token_usage_report",
        "Persist the daily token usage report at midnight HKT with per-endpoint \
         and per-model breakdowns.",
        "0 0 * * *",
        Priority::Low,
        500,
        0.01,
    ),
    (
        "stale_data_cleanup",
        "Weekly cleanup on Sunday at 4 AM HKT: archive old chat sessions and \
         prune usage logs older than 90 days.",
        "0 4 * * 0",
        Priority::Low,
        0,
        0.0,
    ),
];

/// Static advisory list of recommended cron jobs
pub fn schedule_report() -> ScheduleReport {
    let recommended_jobs: Vec<CronJob> = RECOMMENDED_JOBS
        .iter()
        .map(|(name, description, cron, priority, tokens, cost)| CronJob {
            name: name.to_string(),
            description: description.to_string(),
            cron_expression: cron.to_string(),
            timezone: SCHEDULE_TZ.to_string(),
            priority: *priority,
            estimated_tokens_per_run: *tokens,
            estimated_daily_cost_usd: *cost,
        })
        .collect();

    let total_tokens: u64 = recommended_jobs.iter().map(|j| j.estimated_tokens_per_run).sum();
    let total_cost: f64 = recommended_jobs.iter().map(|j| j.estimated_daily_cost_usd).sum();

    let notes = vec![
        "All times are in Asia/Hong_Kong (HKT, UTC+8).".to_string(),
        "Gmail sync runs more often during business hours to catch client emails promptly."
            .to_string(),
        "Feedback analysis runs every 30 minutes so several items share one call.".to_string(),
        "Pattern detection is the most token-intensive job; it runs at 3 AM to avoid \
         peak-hour budget pressure."
            .to_string(),
        format!("Estimated total daily token usage: ~{} tokens.", total_tokens),
        format!("Estimated total daily cost: ~${:.2} USD.", total_cost),
    ];

    ScheduleReport {
        recommended_jobs,
        estimated_daily_token_total: total_tokens,
        estimated_daily_cost_usd: round_to(total_cost, 2),
        notes,
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSuggestion {
    pub operation_type: String,
    pub pending_count: usize,
    pub estimated_tokens_individual: u64,
    pub estimated_tokens_batched: u64,
    pub savings_pct: f64,
    pub message: String,
}

/// Callers with a burst of calls in the last five minutes, in first-seen order
pub fn batch_suggestions(buffer: &CallBuffer, now: DateTime<Utc>) -> Vec<BatchSuggestion> {
    let cutoff = now - Duration::minutes(BATCH_WINDOW_MINUTES);
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for record in buffer.iter().filter(|r| r.timestamp >= cutoff) {
        *counts.entry(record.caller.as_str()).or_default() += 1;
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count >= BATCH_MIN_CALLS)
        .map(|(caller, count)| {
            let individual = count as u64 * EST_TOKENS_PER_CALL;
            let batched = EST_TOKENS_PER_BATCH;
            let savings = (individual.saturating_sub(batched)) as f64 / individual as f64;
            BatchSuggestion {
                operation_type: caller.to_string(),
                pending_count: count,
                estimated_tokens_individual: individual,
                estimated_tokens_batched: batched,
                savings_pct: round_to(savings * 100.0, 1),
                message: format!(
                    "{} {} operations in the last 5 minutes; batch them into one call to save ~{:.0}% tokens.",
                    count,
                    caller,
                    savings * 100.0
                ),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Config and reset
// ---------------------------------------------------------------------------

/// Effective configuration echoed after an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfigView {
    #[serde(flatten)]
    pub config: BudgetConfig,
    pub updated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub reset_circuit_breaker: bool,
    #[serde(default)]
    pub clear_alerts: bool,
    #[serde(default)]
    pub clear_usage_buffer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub circuit_breaker_reset: bool,
    pub alerts_cleared: bool,
    pub usage_buffer_cleared: bool,
    pub message: String,
}

impl ResetOutcome {
    pub(crate) fn new(
        circuit_breaker_reset: bool,
        alerts_cleared: bool,
        usage_buffer_cleared: bool,
    ) -> Self {
        let mut parts = Vec::new();
        if circuit_breaker_reset {
            parts.push("circuit breaker reset");
        }
        if alerts_cleared {
            parts.push("alerts cleared");
        }
        if usage_buffer_cleared {
            parts.push("usage buffer cleared");
        }
        let message = if parts.is_empty() {
            "No action taken.".to_string()
        } else {
            format!("Reset completed: {}", parts.join(", "))
        };
        Self {
            circuit_breaker_reset,
            alerts_cleared,
            usage_buffer_cleared,
            message,
        }
    }
}
