//! AI orchestration engine
//!
//! Admission control, loop detection, circuit breaking and model-downgrade
//! policy in front of a metered, rate-limited LLM API.
//!
//! ```rust,ignore
//! let persistence = PersistenceHandle::from_settings(&config.persistence)?;
//! let engine = OrchestrationEngine::new(config.engine, persistence, Arc::new(SystemClock))?;
//!
//! if engine.check_allowed("/api/chatbot", Priority::Critical).await.allowed {
//!     let model = engine.get_recommended_model(Priority::Critical).await;
//!     // ... call the model ...
//!     engine.record_call(CallReport::new("/api/chatbot", model, 1200, 300)).await;
//! }
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod persistence;

pub use error::{Error, Result};

/// Commonly used types
pub mod prelude {
    pub use crate::api::{build_router, AiContext, EndpointPolicy, TokenUsage};
    pub use crate::config::Config;
    pub use crate::engine::{
        Admission, BreakerState, BudgetConfig, CallReport, Clock, ConfigUpdate,
        OrchestrationEngine, Priority, ResetRequest, SystemClock,
    };
    pub use crate::error::{Error, Result};
    pub use crate::persistence::{PersistenceHandle, UsageSink};
}
