//! Policy engine for circuit breaker trip and reset decisions.

use crate::config::BreakerConfig;
use crate::state::Counters;

/// A policy that determines when to trip and reset a circuit breaker.
///
/// Policies are consulted while the breaker lock is held, so they must be
/// cheap and must not call back into the breaker.
pub trait BreakerPolicy: Send + Sync + 'static {
    /// Determines if the closed circuit should trip open.
    fn should_trip(&self, counters: &Counters, config: &BreakerConfig) -> bool;

    /// Determines if the half-open circuit has seen enough successful probes to close.
    fn should_close(&self, counters: &Counters, config: &BreakerConfig) -> bool;

    /// Whether a closed-state success clears the failures counted so far.
    fn success_resets_failures(&self) -> bool {
        false
    }
}

/// Trips after `failure_threshold` closed-state failures and closes after
/// `half_open_max_calls` successful probes.
///
/// By default closed-state successes do not clear the failure count: only a
/// transition does. An operation that fails intermittently therefore still
/// trips the breaker eventually. [`DefaultPolicy::reset_on_success`] switches
/// to a strict "consecutive failures" count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultPolicy {
    reset_on_success: bool,
}

impl DefaultPolicy {
    /// Creates a new default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every closed-state success clear the failure count.
    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.reset_on_success = reset;
        self
    }
}

impl BreakerPolicy for DefaultPolicy {
    fn should_trip(&self, counters: &Counters, config: &BreakerConfig) -> bool {
        counters.consecutive_failures() >= config.failure_threshold
    }

    fn should_close(&self, counters: &Counters, config: &BreakerConfig) -> bool {
        counters.probes_succeeded() >= config.half_open_max_calls
    }

    fn success_resets_failures(&self) -> bool {
        self.reset_on_success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(failures: u32, succeeded: u32) -> Counters {
        Counters {
            consecutive_failures: failures,
            probes_issued: succeeded,
            probes_succeeded: succeeded,
        }
    }

    #[test]
    fn trips_at_threshold() {
        let config = BreakerConfig::default();
        let policy = DefaultPolicy::new();

        assert!(!policy.should_trip(&counters(9, 0), &config));
        assert!(policy.should_trip(&counters(10, 0), &config));
    }

    #[test]
    fn closes_after_quota_of_successes() {
        let config = BreakerConfig::default();
        let policy = DefaultPolicy::new();

        assert!(!policy.should_close(&counters(0, 4), &config));
        assert!(policy.should_close(&counters(0, 5), &config));
    }

    #[test]
    fn reset_on_success_is_opt_in() {
        assert!(!DefaultPolicy::new().success_resets_failures());
        assert!(DefaultPolicy::new()
            .reset_on_success(true)
            .success_resets_failures());
    }
}
