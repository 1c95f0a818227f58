//! Shared API error model

use serde::{Deserialize, Serialize};

use crate::engine::BreakerState;

/// Machine-readable error codes
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const ADMISSION_DENIED: &str = "AI_ADMISSION_DENIED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Error body returned by every orchestration endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_state: Option<BreakerState>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            circuit_breaker_state: None,
        }
    }

    pub fn with_breaker_state(mut self, state: BreakerState) -> Self {
        self.circuit_breaker_state = Some(state);
        self
    }
}

/// `GET /usage` query
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UsageQuery {
    pub limit: Option<usize>,
}

/// `GET /health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub circuit_breaker_state: BreakerState,
}
