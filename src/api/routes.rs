//! Router assembly

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{self, OrchestrationState};
use crate::api::middleware::{orchestration_middleware, EndpointPolicy, InterceptionState};
use crate::config::ServerConfig;
use crate::engine::OrchestrationEngine;

/// Operator endpoints, mounted under `/api/orchestration`
pub fn orchestration_routes() -> Router<OrchestrationState> {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/usage", get(handlers::get_usage))
        .route("/schedule", get(handlers::get_schedule))
        .route("/alerts", get(handlers::get_alerts))
        .route("/config", post(handlers::update_config))
        .route("/reset", post(handlers::reset))
        .route("/batch-suggestions", get(handlers::get_batch_suggestions))
}

/// Orchestration API plus `/metrics` and `/health`
pub fn build_router(engine: Arc<OrchestrationEngine>, server: &ServerConfig) -> Router {
    build_router_with(engine, server, EndpointPolicy::default(), Router::new())
}

/// Same as [`build_router`], with host application routes placed behind the
/// interception layer
pub fn build_router_with(
    engine: Arc<OrchestrationEngine>,
    server: &ServerConfig,
    policy: EndpointPolicy,
    app: Router,
) -> Router {
    let state = OrchestrationState {
        engine: engine.clone(),
    };
    let interception = InterceptionState::new(engine, policy);

    Router::new()
        .nest("/api/orchestration", orchestration_routes())
        .route("/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health))
        .with_state(state)
        .merge(app)
        .layer(axum::middleware::from_fn_with_state(
            interception,
            orchestration_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(server.body_limit_bytes)),
        )
}
