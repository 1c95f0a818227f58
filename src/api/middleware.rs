//! Interception layer for AI-backed endpoints
//!
//! For every request to an AI endpoint:
//! 1. classify the path into a priority and ask the engine for admission
//! 2. deny with 429 or expose the recommended model to the handler via [`AiContext`]
//! 3. after the handler ran, report the [`TokenUsage`] it left in the response extensions
//! 4. decorate the response with usage headers

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::api::models::{error_codes, ApiError};
use crate::engine::{CallReport, OrchestrationEngine, Priority};

pub const HEADER_TOKENS_USED: &str = "x-ai-tokens-used";
pub const HEADER_BUDGET_REMAINING: &str = "x-ai-budget-remaining";
pub const HEADER_MODEL_USED: &str = "x-ai-model-used";
pub const HEADER_CIRCUIT_BREAKER: &str = "x-ai-circuit-breaker";
pub const HEADER_RESPONSE_TIME: &str = "x-ai-response-time-ms";

const ORCHESTRATION_PREFIX: &str = "/api/orchestration";

/// Path-prefix classification of inbound requests
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    /// First matching prefix wins
    priorities: Vec<(String, Priority)>,
    /// Prefixes whose handlers call the model API
    ai_prefixes: Vec<String>,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self::new(
            [
                ("/api/chatbot", Priority::Critical),
                ("/api/feedback", Priority::High),
                ("/api/gmail", Priority::Medium),
                ("/api/patterns", Priority::Low),
                ("/api/brand", Priority::Medium),
                ("/api/rules", Priority::Medium),
                ("/api/clients", Priority::Medium),
            ],
            ["/api/chatbot", "/api/feedback", "/api/patterns", "/api/brand"],
        )
    }
}

impl EndpointPolicy {
    pub fn new<'a>(
        priorities: impl IntoIterator<Item = (&'a str, Priority)>,
        ai_prefixes: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            priorities: priorities
                .into_iter()
                .map(|(prefix, p)| (prefix.to_string(), p))
                .collect(),
            ai_prefixes: ai_prefixes.into_iter().map(str::to_string).collect(),
        }
    }

    /// Unmatched paths are MEDIUM
    pub fn classify(&self, path: &str) -> Priority {
        self.priorities
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, priority)| *priority)
            .unwrap_or(Priority::Medium)
    }

    pub fn is_ai_endpoint(&self, path: &str) -> bool {
        !path.starts_with(ORCHESTRATION_PREFIX)
            && self.ai_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Interception layer state
#[derive(Clone)]
pub struct InterceptionState {
    pub engine: Arc<OrchestrationEngine>,
    pub policy: Arc<EndpointPolicy>,
}

impl InterceptionState {
    pub fn new(engine: Arc<OrchestrationEngine>, policy: EndpointPolicy) -> Self {
        Self {
            engine,
            policy: Arc::new(policy),
        }
    }
}

/// Inserted into request extensions for admitted AI requests
#[derive(Debug, Clone, PartialEq)]
pub struct AiContext {
    pub priority: Priority,
    pub recommended_model: String,
}

/// Usage a handler reports by inserting it into its response extensions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Defaults to the recommended model
    pub model: Option<String>,
    pub session_id: Option<String>,
}

/// `axum::middleware::from_fn_with_state` entry point
pub async fn orchestration_middleware(
    State(state): State<InterceptionState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !state.policy.is_ai_endpoint(&path) {
        return next.run(request).await;
    }

    let priority = state.policy.classify(&path);
    let admission = state.engine.check_allowed(&path, priority).await;
    if !admission.allowed {
        let breaker = state.engine.breaker_state().await;
        let retry_after = state.engine.retry_after_seconds(priority).await;
        let reason = admission
            .message
            .unwrap_or_else(|| "Request blocked by AI orchestration engine.".to_string());
        warn!(
            "Orchestration blocked {} {}: {}",
            request.method(),
            path,
            reason
        );
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [
                (header::RETRY_AFTER, retry_after.to_string()),
                (HeaderName::from_static(HEADER_CIRCUIT_BREAKER), breaker.to_string()),
            ],
            Json(ApiError::new(error_codes::ADMISSION_DENIED, reason).with_breaker_state(breaker)),
        )
            .into_response();
    }

    let recommended_model = state.engine.get_recommended_model(priority).await;
    request.extensions_mut().insert(AiContext {
        priority,
        recommended_model: recommended_model.clone(),
    });

    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;

    let usage = response
        .extensions_mut()
        .remove::<TokenUsage>()
        .unwrap_or_default();
    let model_used = usage.model.unwrap_or(recommended_model);
    let total_tokens = usage.input_tokens.saturating_add(usage.output_tokens);

    if total_tokens > 0 {
        let mut report =
            CallReport::new(&path, &model_used, usage.input_tokens, usage.output_tokens)
                .with_priority(priority);
        if let Some(session_id) = usage.session_id {
            report = report.with_session(session_id);
        }
        let admission = state.engine.record_call(report).await;
        if let Some(message) = admission.message {
            debug!("Post-flight for {}: {}", path, message);
        }
    }

    let status = state.engine.get_status().await;
    let headers = response.headers_mut();
    set_header(headers, HEADER_TOKENS_USED, total_tokens.to_string());
    set_header(
        headers,
        HEADER_BUDGET_REMAINING,
        format!(
            "tokens={};usd={:.4}",
            status.budget.tokens_remaining, status.budget.cost_remaining_usd
        ),
    );
    set_header(headers, HEADER_MODEL_USED, model_used);
    set_header(headers, HEADER_CIRCUIT_BREAKER, status.circuit_breaker_state.to_string());
    set_header(headers, HEADER_RESPONSE_TIME, elapsed_ms.to_string());

    response
}

/// Values that are not valid header text are skipped
fn set_header(headers: &mut HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
