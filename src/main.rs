use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use ai_orchestration::api::build_router;
use ai_orchestration::config::Config;
use ai_orchestration::engine::{OrchestrationEngine, SystemClock};
use ai_orchestration::observability::init_tracing;
use ai_orchestration::persistence::PersistenceHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_tracing(&config.logging)?;

    let persistence = PersistenceHandle::from_settings(&config.persistence)
        .context("failed to open usage log storage")?;
    let engine =
        OrchestrationEngine::new(config.engine.clone(), persistence, Arc::new(SystemClock))?;

    let app = build_router(engine, &config.server);
    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("AI orchestration service listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
