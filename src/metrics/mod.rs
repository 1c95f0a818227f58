//! Metrics collection for observability

use prometheus::{
    Counter, CounterVec, HistogramVec, IntGauge, Opts, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_int_gauge_with_registry,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

use crate::engine::models::{BreakerState, Priority};

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Engine metrics
    pub calls_recorded: CounterVec,
    pub admission_checks: CounterVec,
    pub tokens: CounterVec,
    pub cost_usd: Counter,
    pub breaker_trips: CounterVec,
    pub breaker_state: IntGauge,

    // Persistence metrics
    pub persistence_writes: CounterVec,

    // HTTP metrics
    pub request_duration: HistogramVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let calls_recorded = register_counter_vec_with_registry!(
            Opts::new("orchestration_calls_recorded_total", "Total AI calls recorded"),
            &["priority", "outcome"],
            registry
        )?;

        let admission_checks = register_counter_vec_with_registry!(
            Opts::new("orchestration_admission_checks_total", "Total pre-flight admission checks"),
            &["outcome"],
            registry
        )?;

        let tokens = register_counter_vec_with_registry!(
            Opts::new("orchestration_tokens_total", "Total tokens consumed"),
            &["model"],
            registry
        )?;

        let cost_usd = register_counter_with_registry!(
            Opts::new("orchestration_cost_usd_total", "Estimated spend in USD"),
            registry
        )?;

        let breaker_trips = register_counter_vec_with_registry!(
            Opts::new("orchestration_breaker_trips_total", "Total circuit breaker trips"),
            &["reason"],
            registry
        )?;

        let breaker_state = register_int_gauge_with_registry!(
            Opts::new(
                "orchestration_breaker_state",
                "Circuit breaker state (0=closed, 1=half_open, 2=open)"
            ),
            registry
        )?;

        let persistence_writes = register_counter_vec_with_registry!(
            Opts::new("orchestration_persistence_writes_total", "Usage log writes by result"),
            &["status"],
            registry
        )?;

        let request_duration = register_histogram_vec_with_registry!(
            "orchestration_request_duration_seconds",
            "Orchestration API request duration in seconds",
            &["endpoint"],
            registry
        )?;

        Ok(Self {
            registry,
            calls_recorded,
            admission_checks,
            tokens,
            cost_usd,
            breaker_trips,
            breaker_state,
            persistence_writes,
            request_duration,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a call reported to the engine
    pub fn record_call(
        &self,
        priority: Priority,
        allowed: bool,
        model: &str,
        tokens: u64,
        cost: f64,
    ) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.calls_recorded
            .with_label_values(&[priority.as_str(), outcome])
            .inc();
        self.tokens.with_label_values(&[model]).inc_by(tokens as f64);
        if cost > 0.0 {
            self.cost_usd.inc_by(cost);
        }
    }

    /// Record a pre-flight check
    pub fn record_admission(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.admission_checks.with_label_values(&[outcome]).inc();
    }

    /// Record a breaker trip
    pub fn record_trip(&self, reason: &str) {
        self.breaker_trips.with_label_values(&[reason]).inc();
    }

    pub fn set_breaker_state(&self, state: BreakerState) {
        self.breaker_state.set(state.gauge_value());
    }

    /// Record a persistence write result
    pub fn record_persistence(&self, status: &str) {
        self.persistence_writes.with_label_values(&[status]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Helper macro to time operations
#[macro_export]
macro_rules! time_operation {
    ($histogram:expr, $label:expr, $operation:expr) => {{
        let timer = $histogram.with_label_values(&[$label]).start_timer();
        let result = $operation;
        timer.observe_duration();
        result
    }};
}
