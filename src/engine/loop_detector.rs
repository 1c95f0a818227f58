//! Per-caller loop detection over a sliding window
//!
//! Two conditions flag a runaway caller:
//! - more than `loop_max_calls` calls inside `loop_window_seconds`
//! - a "stuck" run: the last `stuck_loop_sample_size` calls all within
//!   `stuck_loop_variance` of their mean token count, once the window already
//!   holds at least `loop_max_calls` calls

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

use super::clock;
use super::config::BudgetConfig;
use super::models::AlertSeverity;

/// Which loop condition fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    RateExceeded,
    StuckLoop,
}

/// A detected loop, ready to trip the breaker
#[derive(Debug, Clone, PartialEq)]
pub struct LoopVerdict {
    pub kind: LoopKind,
    pub calls_in_window: usize,
    pub message: String,
}

impl LoopVerdict {
    pub fn severity(&self) -> AlertSeverity {
        match self.kind {
            LoopKind::RateExceeded => AlertSeverity::Error,
            LoopKind::StuckLoop => AlertSeverity::Warning,
        }
    }

    /// Label used on the trip counter
    pub fn reason_label(&self) -> &'static str {
        match self.kind {
            LoopKind::RateExceeded => "rate_exceeded",
            LoopKind::StuckLoop => "stuck_loop",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    at: DateTime<Utc>,
    total_tokens: u64,
}

/// Caller -> recent calls, pruned to the window whenever a caller is touched
#[derive(Debug, Default)]
pub struct CallPatternIndex {
    patterns: HashMap<String, VecDeque<Observation>>,
}

impl CallPatternIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call and check the caller for a loop
    pub fn observe(
        &mut self,
        caller: &str,
        total_tokens: u64,
        now: DateTime<Utc>,
        config: &BudgetConfig,
    ) -> Option<LoopVerdict> {
        let window_start = clock::window_start(now, config.loop_window_seconds);

        let calls = self.patterns.entry(caller.to_string()).or_default();
        calls.push_back(Observation {
            at: now,
            total_tokens,
        });
        while calls.front().map_or(false, |o| o.at < window_start) {
            calls.pop_front();
        }

        let count = calls.len();
        if count > config.loop_max_calls {
            return Some(LoopVerdict {
                kind: LoopKind::RateExceeded,
                calls_in_window: count,
                message: format!(
                    "Loop detected: {} called {} times in {}s (limit: {}). Execution paused. \
                     Consider batching requests or reviewing the calling logic.",
                    caller, count, config.loop_window_seconds, config.loop_max_calls
                ),
            });
        }

        let sample = config.stuck_loop_sample_size;
        if count >= sample && count >= config.loop_max_calls {
            let recent: Vec<u64> = calls
                .iter()
                .skip(count - sample)
                .map(|o| o.total_tokens)
                .collect();
            if is_near_identical(&recent, config.stuck_loop_variance) {
                return Some(LoopVerdict {
                    kind: LoopKind::StuckLoop,
                    calls_in_window: count,
                    message: format!(
                        "Potential stuck loop: {} produced {} calls with near-identical token \
                         usage. The same tool may be called repeatedly without progress.",
                        caller, count
                    ),
                });
            }
        }

        None
    }

    /// Calls currently tracked for a caller, after pruning to the window
    pub fn calls_in_window(&self, caller: &str, now: DateTime<Utc>, window_seconds: u64) -> usize {
        let window_start = clock::window_start(now, window_seconds);
        self.patterns
            .get(caller)
            .map(|calls| calls.iter().filter(|o| o.at >= window_start).count())
            .unwrap_or(0)
    }

    pub fn tracked_callers(&self) -> usize {
        self.patterns.len()
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
    }
}

/// True when every value lies within `max_deviation` (relative) of the mean
fn is_near_identical(values: &[u64], max_deviation: f64) -> bool {
    if values.is_empty() {
        return false;
    }
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return false;
    }
    let worst = values
        .iter()
        .map(|v| (*v as f64 - mean).abs() / mean)
        .fold(0.0_f64, f64::max);
    worst < max_deviation
}
