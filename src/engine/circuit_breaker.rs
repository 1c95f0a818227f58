//! Circuit breaker gating calls to the metered model API
//!
//! The breaker carries no lock of its own; the engine mutates it only while
//! holding the engine lock. Every trip and reset bumps an epoch so that a
//! cooldown timer scheduled for an earlier trip can tell it is stale.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::models::{BreakerState, Priority};

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Successful trial calls before HALF_OPEN closes
    pub half_open_trial_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            half_open_trial_calls: 3,
        }
    }
}

/// Token identifying one OPEN period
pub type TripEpoch = u64;

/// Three-state breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    opened_at: Option<DateTime<Utc>>,
    trial_count: u32,
    epoch: TripEpoch,
    total_trips: u64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            opened_at: None,
            trial_count: 0,
            epoch: 0,
            total_trips: 0,
            config,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn set_trial_threshold(&mut self, half_open_trial_calls: u32) {
        self.config.half_open_trial_calls = half_open_trial_calls.max(1);
    }

    /// Whether a call of this priority may proceed
    pub fn permits(&self, priority: Priority) -> bool {
        match self.state {
            BreakerState::Open => priority.is_critical(),
            BreakerState::Closed | BreakerState::HalfOpen => true,
        }
    }

    /// Move to OPEN
    ///
    /// Returns the epoch a cooldown timer must be armed for, or `None` when
    /// the breaker was already open and its running cooldown is kept.
    pub fn trip(&mut self, now: DateTime<Utc>) -> Option<TripEpoch> {
        if self.state == BreakerState::Open {
            return None;
        }
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.trial_count = 0;
        self.epoch += 1;
        self.total_trips += 1;
        Some(self.epoch)
    }

    /// Cooldown expiry for the given epoch; only a still-current OPEN moves to HALF_OPEN
    pub fn cooldown_elapsed(&mut self, epoch: TripEpoch) -> bool {
        if self.state != BreakerState::Open || self.epoch != epoch {
            return false;
        }
        self.state = BreakerState::HalfOpen;
        self.trial_count = 0;
        true
    }

    /// Count one successful call; returns true when this closes the breaker
    pub fn record_success(&mut self) -> bool {
        if self.state != BreakerState::HalfOpen {
            return false;
        }
        self.trial_count += 1;
        if self.trial_count >= self.config.half_open_trial_calls {
            self.state = BreakerState::Closed;
            self.trial_count = 0;
            self.opened_at = None;
            return true;
        }
        false
    }

    /// Force CLOSED and invalidate any pending cooldown
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.trial_count = 0;
        self.epoch += 1;
    }

    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            state: self.state,
            opened_at: self.opened_at,
            trial_count: self.trial_count,
            trial_threshold: self.config.half_open_trial_calls,
            total_trips: self.total_trips,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    pub trial_count: u32,
    pub trial_threshold: u32,
    pub total_trips: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_closed_by_default() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.permits(Priority::Low));
    }

    #[test]
    fn test_open_only_permits_critical() {
        let mut breaker = CircuitBreaker::default();
        assert!(breaker.trip(Utc::now()).is_some());
        assert!(breaker.permits(Priority::Critical));
        assert!(!breaker.permits(Priority::High));
        assert!(!breaker.permits(Priority::Medium));
        assert!(!breaker.permits(Priority::Low));
    }

    #[test]
    fn test_trip_while_open_keeps_existing_cooldown() {
        let mut breaker = CircuitBreaker::default();
        let epoch = breaker.trip(Utc::now()).unwrap();
        assert!(breaker.trip(Utc::now()).is_none());
        assert!(breaker.cooldown_elapsed(epoch));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_trials() {
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig {
            half_open_trial_calls: 3,
        });
        let epoch = breaker.trip(Utc::now()).unwrap();
        assert!(breaker.cooldown_elapsed(epoch));

        assert!(!breaker.record_success());
        assert!(!breaker.record_success());
        assert!(breaker.record_success());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.stats().trial_count, 0);
    }

    #[test]
    fn test_trip_from_half_open_rearms() {
        let mut breaker = CircuitBreaker::default();
        let first = breaker.trip(Utc::now()).unwrap();
        breaker.cooldown_elapsed(first);
        breaker.record_success();

        let second = breaker.trip(Utc::now()).unwrap();
        assert_ne!(first, second);
        assert_eq!(breaker.state(), BreakerState::Open);
        // the first timer is stale now
        assert!(!breaker.cooldown_elapsed(first));
        assert!(breaker.cooldown_elapsed(second));
    }

    #[test]
    fn test_reset_invalidates_pending_cooldown() {
        let mut breaker = CircuitBreaker::default();
        let epoch = breaker.trip(Utc::now()).unwrap();
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(!breaker.cooldown_elapsed(epoch));

        // a new trip after reset gets a fresh epoch; the old one stays stale
        let fresh = breaker.trip(Utc::now()).unwrap();
        assert!(!breaker.cooldown_elapsed(epoch));
        assert!(breaker.cooldown_elapsed(fresh));
    }

    #[test]
    fn test_success_outside_half_open_is_ignored() {
        let mut breaker = CircuitBreaker::default();
        assert!(!breaker.record_success());
        assert_eq!(breaker.stats().trial_count, 0);
        assert_eq!(breaker.stats().total_trips, 0);
    }
}
