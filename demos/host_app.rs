//! Embedding the orchestration layer in a host application
//!
//! The host's AI handlers read the recommended model from [`AiContext`] and
//! report what they spent by returning a [`TokenUsage`] response extension.
//!
//! ```bash
//! cargo run --example host_app
//! curl -X POST localhost:8080/api/chatbot/ask
//! curl localhost:8080/api/orchestration/status
//! ```

use ai_orchestration::api::{build_router_with, AiContext, EndpointPolicy, TokenUsage};
use ai_orchestration::config::Config;
use ai_orchestration::engine::{OrchestrationEngine, SystemClock};
use ai_orchestration::observability::init_tracing;
use ai_orchestration::persistence::PersistenceHandle;
use axum::{response::IntoResponse, routing::post, Extension, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

async fn ask(Extension(ctx): Extension<AiContext>) -> impl IntoResponse {
    // stand-in for the real model call
    let (input_tokens, output_tokens) = (850, 240);
    (
        Extension(TokenUsage {
            input_tokens,
            output_tokens,
            model: None,
            session_id: None,
        }),
        Json(json!({
            "answer": "Your order ships tomorrow.",
            "model": ctx.recommended_model,
            "priority": ctx.priority,
        })),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config.logging)?;

    let persistence = PersistenceHandle::from_settings(&config.persistence)?;
    let engine =
        OrchestrationEngine::new(config.engine.clone(), persistence, Arc::new(SystemClock))?;

    let host = Router::new().route("/api/chatbot/ask", post(ask));
    let app = build_router_with(engine, &config.server, EndpointPolicy::default(), host);

    let listener = tokio::net::TcpListener::bind(config.server.bind_address()).await?;
    info!("Host app listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
