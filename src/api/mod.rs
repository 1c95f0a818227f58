//! HTTP surface: operator endpoints and the interception layer

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

pub use handlers::OrchestrationState;
pub use middleware::{AiContext, EndpointPolicy, InterceptionState, TokenUsage};
pub use models::{error_codes, ApiError};
pub use routes::{build_router, build_router_with};
