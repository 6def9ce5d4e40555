//! Lifetime statistics and metric sinks.
//!
//! Everything here is observational. The state machine never reads these
//! counters, and sinks are only invoked after the breaker lock is released.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::RejectionKind;
use crate::state::{State, Transition};

/// Trait for metrics sinks that can receive circuit breaker events.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a state transition event.
    fn record_state_transition(&self, from: State, to: State);

    /// Receives every transition with its sequence number.
    ///
    /// Concurrent callers may deliver transitions out of order; sinks that
    /// care can reorder on [`Transition::sequence`]. Defaults to
    /// [`record_state_transition`](MetricSink::record_state_transition).
    fn record_transition(&self, transition: Transition) {
        self.record_state_transition(transition.from, transition.to);
    }

    /// Records a call the admission gate refused.
    fn record_rejection(&self, kind: RejectionKind);

    /// Records a half-open admission decision.
    fn record_probe_attempt(&self, admitted: bool);

    /// Records the outcome of an admitted call.
    fn record_call(&self, success: bool, duration: Duration);

    /// Receives a statistics snapshot requested through
    /// [`CircuitBreaker::report_statistics`](crate::CircuitBreaker::report_statistics).
    fn record_statistics(&self, stats: &Statistics) {
        let _ = stats;
    }
}

/// A null metrics sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state_transition(&self, _from: State, _to: State) {}
    fn record_rejection(&self, _kind: RejectionKind) {}
    fn record_probe_attempt(&self, _admitted: bool) {}
    fn record_call(&self, _success: bool, _duration: Duration) {}
}

/// A sink that writes every event to `tracing`.
#[cfg(feature = "tracing")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracing")))]
#[derive(Debug, Clone)]
pub struct TracingSink {
    name: &'static str,
}

#[cfg(feature = "tracing")]
impl TracingSink {
    /// Creates a sink tagging every event with the breaker `name`.
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[cfg(feature = "tracing")]
impl MetricSink for TracingSink {
    fn record_state_transition(&self, from: State, to: State) {
        tracing::info!(breaker = self.name, %from, %to, "state transition");
    }

    fn record_rejection(&self, kind: RejectionKind) {
        tracing::debug!(breaker = self.name, %kind, "call rejected");
    }

    fn record_probe_attempt(&self, admitted: bool) {
        tracing::debug!(breaker = self.name, admitted, "probe attempt");
    }

    fn record_call(&self, success: bool, duration: Duration) {
        tracing::trace!(
            breaker = self.name,
            success,
            duration_ms = duration.as_millis() as u64,
            "call settled"
        );
    }

    fn record_statistics(&self, stats: &Statistics) {
        tracing::info!(
            breaker = self.name,
            state = %stats.state,
            total_calls = stats.total_calls,
            total_successes = stats.total_successes,
            total_failures = stats.total_failures,
            rejected_open = stats.rejected_open,
            rejected_saturated = stats.rejected_saturated,
            "statistics"
        );
    }
}

/// Lifetime counters of a breaker. Monotonic until [`BreakerStats::reset`].
#[derive(Debug, Default)]
pub(crate) struct BreakerStats {
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    probes_admitted: AtomicU64,
    rejected_open: AtomicU64,
    rejected_saturated: AtomicU64,
}

impl BreakerStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records an admitted call.
    pub(crate) fn record_admitted(&self, probe: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if probe {
            self.probes_admitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a successful call.
    pub(crate) fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed call.
    pub(crate) fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejection. Rejections count on the failure side.
    pub(crate) fn record_rejection(&self, kind: RejectionKind) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            RejectionKind::CircuitOpen => &self.rejected_open,
            RejectionKind::ProbeSaturated => &self.rejected_saturated,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, state: State) -> Statistics {
        Statistics {
            state,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            probes_admitted: self.probes_admitted.load(Ordering::Relaxed),
            rejected_open: self.rejected_open.load(Ordering::Relaxed),
            rejected_saturated: self.rejected_saturated.load(Ordering::Relaxed),
        }
    }

    /// Resets all statistics.
    pub(crate) fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.total_successes.store(0, Ordering::Relaxed);
        self.total_failures.store(0, Ordering::Relaxed);
        self.probes_admitted.store(0, Ordering::Relaxed);
        self.rejected_open.store(0, Ordering::Relaxed);
        self.rejected_saturated.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of a breaker's lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    /// State when the snapshot was taken.
    pub state: State,
    /// Calls admitted to the wrapped operation.
    pub total_calls: u64,
    /// Admitted calls that succeeded.
    pub total_successes: u64,
    /// Admitted calls that failed, plus rejected calls.
    pub total_failures: u64,
    /// Admitted calls that were half-open probes.
    pub probes_admitted: u64,
    /// Calls rejected because the circuit was open.
    pub rejected_open: u64,
    /// Calls rejected because the probe quota was exhausted.
    pub rejected_saturated: u64,
}

impl Statistics {
    /// Calls refused without invoking the operation.
    pub fn total_rejections(&self) -> u64 {
        self.rejected_open + self.rejected_saturated
    }

    /// Share of settled or rejected calls that ended in failure.
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            return 0.0;
        }
        self.total_failures as f64 / total as f64
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} calls={} successes={} failures={} rejected(open={}, saturated={}) failure_rate={:.2}",
            self.state,
            self.total_calls,
            self.total_successes,
            self.total_failures,
            self.rejected_open,
            self.rejected_saturated,
            self.failure_rate()
        )
    }
}
