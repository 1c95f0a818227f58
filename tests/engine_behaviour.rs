//! End-to-end behaviour of the orchestration engine

use ai_orchestration::engine::{
    AlertCategory, AlertSeverity, BreakerState, BudgetConfig, CallReport, ConfigUpdate,
    ManualClock, OrchestrationEngine, Priority, ResetRequest,
};
use ai_orchestration::persistence::{NoopUsageSink, PersistenceHandle, SqliteUsageSink};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DOWNGRADE_MODEL: &str = "claude-haiku-35";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 20, 10, 0, 0).unwrap()
}

fn engine_with(config: BudgetConfig) -> (Arc<OrchestrationEngine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let persistence =
        PersistenceHandle::spawn(Arc::new(NoopUsageSink), 256, std::time::Duration::from_secs(1));
    let engine = OrchestrationEngine::new(config, persistence, clock.clone()).unwrap();
    (engine, clock)
}

fn tight_budget() -> BudgetConfig {
    BudgetConfig {
        daily_token_limit: 1000,
        budget_warning_threshold: 0.8,
        ..Default::default()
    }
}

/// Six calls from one caller at one instant; sizes vary so only the rate rule fires
async fn trip_breaker(engine: &OrchestrationEngine, caller: &str) {
    for i in 0..6u64 {
        engine
            .record_call(CallReport::new(caller, "m1", 10 * (i + 1), 0))
            .await;
    }
    assert_eq!(engine.breaker_state().await, BreakerState::Open);
}

#[tokio::test]
async fn test_recorded_calls_keep_token_and_cost_invariants() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    engine
        .record_call(CallReport::new("chatbot", "claude-opus-4-0", 1234, 567))
        .await;
    engine
        .record_call(CallReport::new("feedback", "unknown-model", 0, 0))
        .await;

    let usage = engine.get_usage(10).await;
    for entry in &usage.recent_logs {
        assert_eq!(entry.total_tokens, entry.input_tokens + entry.output_tokens);
        assert!(entry.estimated_cost_usd >= 0.0);
    }
}

#[tokio::test]
async fn test_end_to_end_three_calls() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    for _ in 0..3 {
        let admission = engine
            .record_call(CallReport::new("chatbot", "m1", 100, 50).with_priority(Priority::Medium))
            .await;
        assert!(admission.allowed);
        assert!(admission.message.is_none());
    }

    let usage = engine.get_usage(10).await;
    assert_eq!(usage.recent_logs.len(), 3);
    assert_eq!(usage.daily_total_tokens, 450);
    assert_eq!(usage.by_endpoint.len(), 1);
    assert_eq!(usage.by_endpoint[0].call_count, 3);
}

#[tokio::test]
async fn test_sixth_call_in_window_trips_breaker() {
    let (engine, clock) = engine_with(BudgetConfig::default());
    for i in 0..5u64 {
        let admission = engine
            .record_call(CallReport::new("agent", "m1", 100 * (i + 1), 0))
            .await;
        assert!(admission.allowed, "call {} should be allowed", i + 1);
        clock.advance(Duration::seconds(5));
    }
    let admission = engine.record_call(CallReport::new("agent", "m1", 900, 0)).await;
    assert!(!admission.allowed);
    assert!(admission.message.unwrap().contains("Loop detected"));
    assert_eq!(engine.breaker_state().await, BreakerState::Open);
}

#[tokio::test]
async fn test_spaced_calls_never_trip() {
    let (engine, clock) = engine_with(BudgetConfig::default());
    for _ in 0..5 {
        let admission = engine.record_call(CallReport::new("agent", "m1", 500, 0)).await;
        assert!(admission.allowed);
        clock.advance(Duration::seconds(61));
    }
    assert_eq!(engine.breaker_state().await, BreakerState::Closed);
    assert_eq!(engine.get_alerts().await.total, 0);
}

#[tokio::test]
async fn test_near_identical_calls_trip_as_stuck_loop() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    let mut last = None;
    for i in 0..5u64 {
        last = Some(engine.record_call(CallReport::new("tool", "m1", 1000 + i, 0)).await);
    }
    assert!(!last.unwrap().allowed);
    assert_eq!(engine.breaker_state().await, BreakerState::Open);

    let alerts = engine.get_alerts().await;
    let has_alert = |category, severity| {
        alerts
            .alerts
            .iter()
            .any(|a| a.category == category && a.severity == severity)
    };
    assert!(has_alert(AlertCategory::LoopDetection, AlertSeverity::Warning));
    assert!(has_alert(AlertCategory::CircuitBreaker, AlertSeverity::Critical));
}

#[tokio::test]
async fn test_open_breaker_only_admits_critical() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    trip_breaker(&engine, "agent").await;

    for priority in [Priority::High, Priority::Medium, Priority::Low] {
        let admission = engine
            .record_call(CallReport::new("other", "m1", 10, 10).with_priority(priority))
            .await;
        assert!(!admission.allowed, "{} should be blocked", priority);
        assert!(!engine.check_allowed("other", priority).await.allowed);
    }

    let admission = engine
        .record_call(CallReport::new("other", "m1", 10, 10).with_priority(Priority::Critical))
        .await;
    assert!(admission.allowed);
    assert!(engine.check_allowed("other", Priority::Critical).await.allowed);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_moves_to_half_open_and_trials_close() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    trip_breaker(&engine, "agent").await;

    tokio::time::sleep(std::time::Duration::from_secs(59)).await;
    assert_eq!(engine.breaker_state().await, BreakerState::Open);

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    assert_eq!(engine.breaker_state().await, BreakerState::HalfOpen);

    let trial_callers = ["a", "b", "c"];
    for (i, caller) in trial_callers.iter().enumerate() {
        let admission = engine.record_call(CallReport::new(*caller, "m1", 10, 10)).await;
        assert!(admission.allowed);
        let expected = if i < 2 {
            BreakerState::HalfOpen
        } else {
            BreakerState::Closed
        };
        assert_eq!(engine.breaker_state().await, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_trip_in_half_open_rearms_cooldown() {
    // enough trials that the burst below trips before the breaker closes
    let (engine, clock) = engine_with(BudgetConfig {
        half_open_trial_calls: 10,
        ..Default::default()
    });
    trip_breaker(&engine, "agent").await;
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    assert_eq!(engine.breaker_state().await, BreakerState::HalfOpen);

    clock.advance(Duration::seconds(61));
    trip_breaker(&engine, "agent-2").await;
    assert_eq!(engine.breaker_stats().await.total_trips, 2);

    tokio::time::sleep(std::time::Duration::from_secs(59)).await;
    assert_eq!(engine.breaker_state().await, BreakerState::Open);
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    assert_eq!(engine.breaker_state().await, BreakerState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_reset_cancels_pending_cooldown() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    trip_breaker(&engine, "agent").await;

    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    engine
        .reset(ResetRequest {
            reset_circuit_breaker: true,
            ..Default::default()
        })
        .await;
    assert_eq!(engine.breaker_state().await, BreakerState::Closed);

    // a second trip after the reset gets its own cooldown
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    trip_breaker(&engine, "agent").await;

    // the first timer fires at t=60 and must not touch the new trip
    tokio::time::sleep(std::time::Duration::from_secs(25)).await;
    assert_eq!(engine.breaker_state().await, BreakerState::Open);

    tokio::time::sleep(std::time::Duration::from_secs(40)).await;
    assert_eq!(engine.breaker_state().await, BreakerState::HalfOpen);
}

#[tokio::test]
async fn test_budget_downgrade_spares_critical() {
    let (engine, _clock) = engine_with(tight_budget());
    engine.record_call(CallReport::new("a", "m1", 400, 0)).await;
    assert_eq!(engine.get_recommended_model(Priority::Medium).await, DEFAULT_MODEL);

    engine.record_call(CallReport::new("b", "m1", 400, 0)).await;
    assert_eq!(engine.get_recommended_model(Priority::Medium).await, DOWNGRADE_MODEL);
    assert_eq!(engine.get_recommended_model(Priority::Low).await, DOWNGRADE_MODEL);
    assert_eq!(engine.get_recommended_model(Priority::Critical).await, DEFAULT_MODEL);

    let status = engine.get_status().await;
    assert!(status.downgraded);
    assert_eq!(status.active_model, DOWNGRADE_MODEL);

    let warnings: Vec<_> = engine
        .get_alerts()
        .await
        .alerts
        .into_iter()
        .filter(|a| a.category == AlertCategory::BudgetWarning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity, AlertSeverity::Warning);
}

#[tokio::test]
async fn test_hard_budget_block() {
    let (engine, _clock) = engine_with(tight_budget());
    engine.record_call(CallReport::new("a", "m1", 600, 0)).await;
    engine.record_call(CallReport::new("b", "m1", 401, 0)).await;

    let admission = engine
        .record_call(CallReport::new("c", "m1", 10, 0).with_priority(Priority::Medium))
        .await;
    assert!(!admission.allowed);
    assert!(admission.message.unwrap().contains("Daily budget exceeded"));
    assert!(!engine.check_allowed("c", Priority::High).await.allowed);

    let admission = engine
        .record_call(CallReport::new("d", "m1", 10, 0).with_priority(Priority::Critical))
        .await;
    assert!(admission.allowed);
    assert!(engine.check_allowed("d", Priority::Critical).await.allowed);

    let status = engine.get_status().await;
    assert_eq!(status.budget.tokens_remaining, 0);
    assert!(status.budget.utilisation_pct > 100.0);
}

#[tokio::test]
async fn test_budget_resets_at_utc_midnight() {
    let (engine, clock) = engine_with(tight_budget());
    engine.record_call(CallReport::new("a", "m1", 1200, 0)).await;
    assert!(!engine.check_allowed("a", Priority::Low).await.allowed);

    clock.set(Utc.with_ymd_and_hms(2026, 4, 21, 0, 0, 1).unwrap());
    assert!(engine.check_allowed("a", Priority::Low).await.allowed);
    assert_eq!(engine.get_status().await.budget.tokens_used_today, 0);
}

#[tokio::test]
async fn test_reset_gives_fresh_start() {
    let (engine, _clock) = engine_with(tight_budget());
    engine.record_call(CallReport::new("x", "m1", 850, 0)).await;
    assert!(engine.get_status().await.downgraded);
    trip_breaker(&engine, "agent").await;

    let outcome = engine
        .reset(ResetRequest {
            reset_circuit_breaker: true,
            ..Default::default()
        })
        .await;
    assert!(outcome.circuit_breaker_reset);
    assert_eq!(outcome.message, "Reset completed: circuit breaker reset");

    let status = engine.get_status().await;
    assert_eq!(status.circuit_breaker_state, BreakerState::Closed);
    assert!(!status.downgraded);
    assert_eq!(status.active_model, DEFAULT_MODEL);

    // pattern history is gone: five more calls fit in a fresh window
    engine
        .update_config(ConfigUpdate {
            daily_token_limit: Some(1_000_000),
            ..Default::default()
        })
        .await
        .unwrap();
    for i in 0..5u64 {
        let admission = engine
            .record_call(CallReport::new("agent", "m1", 100 * (i + 1), 0))
            .await;
        assert!(admission.allowed);
    }
    let admission = engine.record_call(CallReport::new("agent", "m1", 999, 0)).await;
    assert!(!admission.allowed);
}

#[tokio::test]
async fn test_reset_flags_are_independent() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    trip_breaker(&engine, "agent").await;

    let outcome = engine
        .reset(ResetRequest {
            clear_alerts: true,
            clear_usage_buffer: true,
            ..Default::default()
        })
        .await;
    assert_eq!(
        outcome.message,
        "Reset completed: alerts cleared, usage buffer cleared"
    );
    assert_eq!(engine.breaker_state().await, BreakerState::Open);
    assert_eq!(engine.get_alerts().await.total, 0);
    assert!(engine.get_usage(10).await.recent_logs.is_empty());

    let outcome = engine.reset(ResetRequest::default()).await;
    assert_eq!(outcome.message, "No action taken.");
}

#[tokio::test]
async fn test_reporting_views_are_idempotent() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    for caller in ["a", "b", "a", "c"] {
        engine.record_call(CallReport::new(caller, "m1", 120, 30)).await;
    }

    assert_eq!(engine.get_status().await, engine.get_status().await);
    assert_eq!(engine.get_usage(10).await, engine.get_usage(10).await);
    assert_eq!(engine.get_alerts().await, engine.get_alerts().await);
    assert_eq!(engine.suggest_batching().await, engine.suggest_batching().await);
}

#[tokio::test]
async fn test_check_allowed_does_not_feed_loop_detection() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    for _ in 0..20 {
        assert!(engine.check_allowed("agent", Priority::Low).await.allowed);
    }
    for i in 0..5u64 {
        let admission = engine
            .record_call(CallReport::new("agent", "m1", 100 * (i + 1), 0))
            .await;
        assert!(admission.allowed);
    }
    assert_eq!(engine.get_usage(50).await.recent_logs.len(), 5);
}

#[tokio::test]
async fn test_batch_suggestions_for_bursty_caller() {
    let (engine, clock) = engine_with(BudgetConfig::default());
    for i in 0..4u64 {
        engine
            .record_call(CallReport::new("/api/feedback", "m1", 200 * (i + 1), 0))
            .await;
        clock.advance(Duration::seconds(20));
    }
    engine.record_call(CallReport::new("/api/chatbot", "m1", 50, 0)).await;

    let suggestions = engine.suggest_batching().await;
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].operation_type, "/api/feedback");
    assert_eq!(suggestions[0].pending_count, 4);
}

#[tokio::test]
async fn test_invalid_config_update_changes_nothing() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    let before = engine.config().await;
    let result = engine
        .update_config(ConfigUpdate {
            daily_token_limit: Some(2000),
            budget_warning_threshold: Some(0.0),
            ..Default::default()
        })
        .await;
    assert!(result.is_err());
    assert_eq!(engine.config().await, before);
}

#[tokio::test]
async fn test_huge_token_counts_do_not_break_reports() {
    let (engine, _clock) = engine_with(BudgetConfig::default());
    engine
        .record_call(CallReport::new("a", "m", u64::MAX - 10, 0))
        .await;
    engine.record_call(CallReport::new("b", "m", 100, 0)).await;

    let status = engine.get_status().await;
    assert_eq!(status.budget.tokens_used_today, u64::MAX);
    assert_eq!(status.budget.tokens_remaining, 0);
    assert_eq!(status.metrics.total_calls_today, 2);

    let usage = engine.get_usage(10).await;
    assert_eq!(usage.daily_total_tokens, u64::MAX);
    assert_eq!(usage.by_model[0].total_tokens, u64::MAX);
    assert_eq!(usage.recent_logs.len(), 2);
}

#[tokio::test]
async fn test_calls_are_persisted_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(SqliteUsageSink::open(dir.path().join("usage.db")).unwrap());
    let persistence =
        PersistenceHandle::spawn(sink.clone(), 16, std::time::Duration::from_secs(5));
    let clock = Arc::new(ManualClock::new(start()));
    let engine = OrchestrationEngine::new(BudgetConfig::default(), persistence, clock).unwrap();

    for caller in ["chatbot", "feedback", "patterns"] {
        engine.record_call(CallReport::new(caller, "m1", 100, 50)).await;
    }

    for _ in 0..200 {
        if engine.persistence_stats().written() == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(sink.count().await.unwrap(), 3);

    let usage = engine.get_usage(10).await;
    let rows = sink.recent(10).await.unwrap();
    for entry in &usage.recent_logs {
        assert!(rows.iter().any(|r| r.id == entry.id && r.caller == entry.caller));
    }
}
