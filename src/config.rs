//! Configuration for circuit breakers.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::policy::{BreakerPolicy, DefaultPolicy};
use crate::timer::TimerDriver;

/// Failures in the closed state before the breaker trips.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// How long the breaker stays open before the first probe.
pub const DEFAULT_OPEN_PERIOD: Duration = Duration::from_millis(2000);

/// How long a half-open episode lasts before it closes on its own.
pub const DEFAULT_HALF_OPEN_PERIOD: Duration = Duration::from_millis(2000);

/// Probes admitted per half-open episode.
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 5;

/// Upper bound for either period.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Thresholds and periods of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures counted in the closed state before tripping.
    pub failure_threshold: u32,
    /// Cooldown between tripping and the first probe.
    pub open_period: Duration,
    /// Length of the probe window; the breaker closes when it ends without a probe failure.
    pub half_open_period: Duration,
    /// Probes admitted per half-open episode, and successes needed to close early.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_period: DEFAULT_OPEN_PERIOD,
            half_open_period: DEFAULT_HALF_OPEN_PERIOD,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

impl BreakerConfig {
    /// Checks that the configuration describes a breaker that can make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::ZeroProbeQuota);
        }
        for (name, value) in [
            ("open period", self.open_period),
            ("half-open period", self.half_open_period),
        ] {
            if value > MAX_PERIOD {
                return Err(ConfigError::PeriodTooLong {
                    name,
                    value,
                    max: MAX_PERIOD,
                });
            }
        }
        Ok(())
    }
}

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder<P, E>
where
    P: BreakerPolicy,
    E: std::error::Error + 'static,
{
    config: BreakerConfig,
    policy: P,
    clock: Arc<dyn Clock>,
    timer_driver: Option<Arc<dyn TimerDriver>>,
    metric_sink: Arc<dyn MetricSink>,
    hook_registry: Arc<HookRegistry>,
    _error_type: PhantomData<fn() -> E>,
}

impl<E> Default for BreakerBuilder<DefaultPolicy, E>
where
    E: std::error::Error + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> BreakerBuilder<DefaultPolicy, E>
where
    E: std::error::Error + 'static,
{
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: BreakerConfig::default(),
            policy: DefaultPolicy::default(),
            clock: Arc::new(SystemClock),
            timer_driver: None,
            metric_sink: Arc::new(NullMetricSink),
            hook_registry: Arc::new(HookRegistry::new()),
            _error_type: PhantomData,
        }
    }
}

impl<P, E> BreakerBuilder<P, E>
where
    P: BreakerPolicy,
    E: std::error::Error + 'static,
{
    /// Replaces every threshold and period at once.
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of closed-state failures that trips the circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Sets how long the circuit stays open before probing.
    pub fn open_period(mut self, duration: Duration) -> Self {
        self.config.open_period = duration;
        self
    }

    /// Sets how long a half-open episode lasts before closing on its own.
    pub fn half_open_period(mut self, duration: Duration) -> Self {
        self.config.half_open_period = duration;
        self
    }

    /// Sets the number of probes admitted per half-open episode.
    pub fn half_open_max_calls(mut self, calls: u32) -> Self {
        self.config.half_open_max_calls = calls;
        self
    }

    /// Sets a custom policy for the circuit breaker.
    pub fn policy<Q: BreakerPolicy>(self, policy: Q) -> BreakerBuilder<Q, E> {
        BreakerBuilder {
            config: self.config,
            policy,
            clock: self.clock,
            timer_driver: self.timer_driver,
            metric_sink: self.metric_sink,
            hook_registry: self.hook_registry,
            _error_type: PhantomData,
        }
    }

    /// Sets the time source used for cooldown deadlines.
    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Wakes the breaker at every deadline instead of waiting for the next call.
    pub fn timer_driver<D: TimerDriver>(mut self, driver: D) -> Self {
        self.timer_driver = Some(Arc::new(driver));
        self
    }

    /// Sets a metric sink for the circuit breaker.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.metric_sink = Arc::new(sink);
        self
    }

    /// Shares an existing metric sink with the circuit breaker.
    pub fn shared_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Sets a hook registry for the circuit breaker.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hook_registry = Arc::new(hooks);
        self
    }

    /// Changes the error type for the builder.
    pub fn with_error_type<NewE: std::error::Error + 'static>(self) -> BreakerBuilder<P, NewE> {
        BreakerBuilder {
            config: self.config,
            policy: self.policy,
            clock: self.clock,
            timer_driver: self.timer_driver,
            metric_sink: self.metric_sink,
            hook_registry: self.hook_registry,
            _error_type: PhantomData,
        }
    }

    /// Validates the configuration and builds the circuit breaker.
    pub fn build(self) -> Result<CircuitBreaker<P, E>, ConfigError> {
        self.config.validate()?;
        Ok(CircuitBreaker::new(
            self.config,
            self.policy,
            self.clock,
            self.timer_driver,
            self.metric_sink,
            self.hook_registry,
        ))
    }
}
