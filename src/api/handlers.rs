//! Operator-facing orchestration endpoints

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::models::{error_codes, ApiError, HealthResponse, UsageQuery};
use crate::engine::{
    AlertsReport, BatchSuggestion, ConfigUpdate, EngineConfigView, EngineError, EngineStatus,
    OrchestrationEngine, ResetOutcome, ResetRequest, ScheduleReport, UsageReport,
};
use crate::metrics::METRICS;
use crate::time_operation;

const DEFAULT_USAGE_LIMIT: usize = 50;
const MAX_USAGE_LIMIT: usize = 1000;

/// Orchestration API state
#[derive(Clone)]
pub struct OrchestrationState {
    pub engine: Arc<OrchestrationEngine>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn validation_error(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError::new(error_codes::VALIDATION_ERROR, message)),
    )
}

/// Current engine state
///
/// GET /api/orchestration/status
pub async fn get_status(State(state): State<OrchestrationState>) -> Json<EngineStatus> {
    let status = time_operation!(
        METRICS.request_duration,
        "status",
        state.engine.get_status().await
    );
    Json(status)
}

/// Usage history
///
/// GET /api/orchestration/usage?limit=N
pub async fn get_usage(
    State(state): State<OrchestrationState>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<UsageReport> {
    let limit = query.limit.unwrap_or(DEFAULT_USAGE_LIMIT);
    if limit == 0 || limit > MAX_USAGE_LIMIT {
        return Err(validation_error(format!(
            "limit must be between 1 and {}",
            MAX_USAGE_LIMIT
        )));
    }
    let usage = time_operation!(
        METRICS.request_duration,
        "usage",
        state.engine.get_usage(limit).await
    );
    Ok(Json(usage))
}

/// Recommended cron schedule
///
/// GET /api/orchestration/schedule
pub async fn get_schedule(State(state): State<OrchestrationState>) -> Json<ScheduleReport> {
    Json(state.engine.suggest_schedule())
}

/// GET /api/orchestration/alerts
pub async fn get_alerts(State(state): State<OrchestrationState>) -> Json<AlertsReport> {
    let alerts = time_operation!(
        METRICS.request_duration,
        "alerts",
        state.engine.get_alerts().await
    );
    Json(alerts)
}

/// Partial config update
///
/// POST /api/orchestration/config
pub async fn update_config(
    State(state): State<OrchestrationState>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<EngineConfigView> {
    match time_operation!(
        METRICS.request_duration,
        "config",
        state.engine.update_config(update).await
    ) {
        Ok(view) => Ok(Json(view)),
        Err(EngineError::InvalidConfig { field, reason }) => {
            warn!("Rejected config update: {} {}", field, reason);
            Err(validation_error(format!("{}: {}", field, reason)))
        }
    }
}

/// Operator reset
///
/// POST /api/orchestration/reset
pub async fn reset(
    State(state): State<OrchestrationState>,
    Json(request): Json<ResetRequest>,
) -> Json<ResetOutcome> {
    info!("Reset requested: {:?}", request);
    let outcome = time_operation!(
        METRICS.request_duration,
        "reset",
        state.engine.reset(request).await
    );
    Json(outcome)
}

/// GET /api/orchestration/batch-suggestions
pub async fn get_batch_suggestions(
    State(state): State<OrchestrationState>,
) -> Json<Vec<BatchSuggestion>> {
    Json(state.engine.suggest_batching().await)
}

/// Prometheus exposition
///
/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}

/// Liveness
///
/// GET /health
pub async fn health(State(state): State<OrchestrationState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        circuit_breaker_state: state.engine.breaker_state().await,
    })
}
