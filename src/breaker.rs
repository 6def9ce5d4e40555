//! Core circuit breaker implementation.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::{BreakerBuilder, BreakerConfig};
use crate::error::{BreakerError, BreakerResult, RejectionKind};
use crate::hook::HookRegistry;
use crate::metrics::{BreakerStats, MetricSink, Statistics};
use crate::policy::{BreakerPolicy, DefaultPolicy};
use crate::state::{Counters, State, StateMachine, Ticket, Transitions};
use crate::timer::{TimerDriver, TimerId};

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner<P>
where
    P: BreakerPolicy,
{
    machine: Mutex<StateMachine>,
    config: BreakerConfig,
    policy: P,
    stats: BreakerStats,
    clock: Arc<dyn Clock>,
    timer_driver: Option<Arc<dyn TimerDriver>>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
    this: Weak<BreakerInner<P>>,
}

impl<P> BreakerInner<P>
where
    P: BreakerPolicy,
{
    /// Runs `f` on the state machine under the lock, after applying every
    /// timer that is due. Transitions are published once the lock is released.
    fn with_machine<R>(&self, f: impl FnOnce(&mut StateMachine, Instant, &mut Transitions) -> R) -> R {
        let mut transitions = Transitions::new();
        let result = {
            let mut machine = self.machine.lock();
            let now = self.clock.now();
            machine.advance(now, &self.config, &mut transitions);
            let result = f(&mut machine, now, &mut transitions);
            self.attach_wakeup(&mut machine, now);
            result
        };
        self.publish(&transitions);
        result
    }

    /// Asks the timer driver, if any, to wake the breaker at the pending deadline.
    fn attach_wakeup(&self, machine: &mut StateMachine, now: Instant) {
        let Some(driver) = self.timer_driver.as_ref() else {
            return;
        };
        let Some((id, deadline)) = machine.scheduler().unattached() else {
            return;
        };

        let this = self.this.clone();
        let handle = driver.schedule(
            deadline.saturating_duration_since(now),
            Box::new(move || {
                // The breaker may be gone by now.
                if let Some(inner) = this.upgrade() {
                    inner.on_timer(id);
                }
            }),
        );
        machine.scheduler_mut().attach(id, handle);
    }

    fn on_timer(&self, id: TimerId) {
        #[cfg(feature = "tracing")]
        tracing::debug!("cooldown timer woke the breaker");

        // If the deadline is not reached yet the wakeup was early; release it
        // so a new one gets scheduled on the way out.
        self.with_machine(|machine, _, _| machine.scheduler_mut().release(id));
    }

    fn publish(&self, transitions: &Transitions) {
        for transition in transitions {
            #[cfg(feature = "tracing")]
            if transition.to == State::Open {
                tracing::warn!(
                    from = %transition.from,
                    sequence = transition.sequence,
                    "circuit breaker tripped"
                );
            } else {
                tracing::info!(
                    from = %transition.from,
                    to = %transition.to,
                    sequence = transition.sequence,
                    "circuit breaker state changed"
                );
            }

            self.metric_sink.record_transition(*transition);
            self.hooks.execute_state_transition_hook(transition.to);
        }
    }

    fn admit(&self) -> Result<AdmittedCall<'_, P>, RejectionKind> {
        match self.with_machine(|machine, _, _| machine.admit(&self.config)) {
            Ok(ticket) => {
                self.stats.record_admitted(ticket.is_probe());
                if ticket.is_probe() {
                    self.metric_sink.record_probe_attempt(true);
                }
                Ok(AdmittedCall {
                    inner: self,
                    ticket: Some(ticket),
                    started: self.clock.now(),
                })
            }
            Err(kind) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%kind, "call rejected");

                self.stats.record_rejection(kind);
                if kind == RejectionKind::ProbeSaturated {
                    self.metric_sink.record_probe_attempt(false);
                }
                self.metric_sink.record_rejection(kind);
                self.hooks.execute_rejected_hook(kind);
                Err(kind)
            }
        }
    }

    fn settle(&self, ticket: Ticket, success: bool, started: Instant) {
        let applied = self.with_machine(|machine, now, out| {
            if success {
                machine.record_success(ticket, &self.policy, &self.config, out)
            } else {
                machine.record_failure(ticket, &self.policy, &self.config, now, out)
            }
        });

        #[cfg(feature = "tracing")]
        if !applied {
            tracing::debug!(
                probe = ticket.is_probe(),
                success,
                "outcome arrived after the breaker changed state, counted in statistics only"
            );
        }
        #[cfg(not(feature = "tracing"))]
        let _ = applied;

        if success {
            self.stats.record_success();
            self.hooks.execute_success_hook();
        } else {
            self.stats.record_failure();
            self.hooks.execute_failure_hook();
        }

        let duration = self.clock.now().saturating_duration_since(started);
        self.metric_sink.record_call(success, duration);
    }
}

impl<P> Drop for BreakerInner<P>
where
    P: BreakerPolicy,
{
    fn drop(&mut self) {
        // Stop the driver task sleeping towards a deadline nobody will observe.
        self.machine.get_mut().scheduler_mut().cancel_any();
    }
}

/// An admitted call whose outcome has not been recorded yet.
///
/// Dropping it unsettled (the operation panicked, or its future was dropped)
/// records a failure so the admission is never lost.
struct AdmittedCall<'a, P>
where
    P: BreakerPolicy,
{
    inner: &'a BreakerInner<P>,
    ticket: Option<Ticket>,
    started: Instant,
}

impl<P> AdmittedCall<'_, P>
where
    P: BreakerPolicy,
{
    fn settle(mut self, success: bool) {
        if let Some(ticket) = self.ticket.take() {
            self.inner.settle(ticket, success, self.started);
        }
    }
}

impl<P> Drop for AdmittedCall<'_, P>
where
    P: BreakerPolicy,
{
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                probe = ticket.is_probe(),
                "admitted call abandoned before settling, recording a failure"
            );
            self.inner.settle(ticket, false, self.started);
        }
    }
}

/// A circuit breaker that can wrap function calls to prevent cascading failures.
///
/// Clones share the same state.
pub struct CircuitBreaker<P, E>
where
    P: BreakerPolicy,
    E: std::error::Error + 'static,
{
    inner: Arc<BreakerInner<P>>,
    _error_type: PhantomData<fn() -> E>,
}

impl<P, E> CircuitBreaker<P, E>
where
    P: BreakerPolicy,
    E: std::error::Error + 'static,
{
    /// Creates a new circuit breaker. The configuration must already be validated.
    pub(crate) fn new(
        config: BreakerConfig,
        policy: P,
        clock: Arc<dyn Clock>,
        timer_driver: Option<Arc<dyn TimerDriver>>,
        metric_sink: Arc<dyn MetricSink>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| BreakerInner {
            machine: Mutex::new(StateMachine::new()),
            config,
            policy,
            stats: BreakerStats::new(),
            clock,
            timer_driver,
            metric_sink,
            hooks,
            this: this.clone(),
        });

        Self {
            inner,
            _error_type: PhantomData,
        }
    }

    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder() -> BreakerBuilder<DefaultPolicy, E> {
        BreakerBuilder::new()
    }

    /// Gets the current state of the circuit breaker.
    ///
    /// Any cooldown that has elapsed is applied first.
    pub fn current_state(&self) -> State {
        self.inner.with_machine(|machine, _, _| machine.state())
    }

    /// Gets the counters that drive transitions.
    pub fn counters(&self) -> Counters {
        self.inner.with_machine(|machine, _, _| machine.counters())
    }

    /// The thresholds and periods this breaker runs with.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Takes a snapshot of the lifetime counters.
    pub fn statistics(&self) -> Statistics {
        self.inner.stats.snapshot(self.current_state())
    }

    /// Pushes a statistics snapshot to the metric sink and returns it.
    pub fn report_statistics(&self) -> Statistics {
        let stats = self.statistics();
        self.inner.metric_sink.record_statistics(&stats);
        stats
    }

    /// Executes a function wrapped by the circuit breaker.
    ///
    /// Returns [`BreakerError::CircuitOpen`] or [`BreakerError::ProbeSaturated`]
    /// without calling `f` when the breaker refuses the call.
    pub fn fire<F, T>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let call = self.inner.admit()?;
        let result = f();
        call.settle(result.is_ok());

        result.map_err(BreakerError::Upstream)
    }

    /// Forces the circuit breaker to the open state and starts a full cooldown.
    ///
    /// Returns false if it was already open.
    pub fn force_open(&self) -> bool {
        let config = &self.inner.config;
        self.inner
            .with_machine(|machine, now, out| machine.trip(now, config, out))
    }

    /// Forces the circuit breaker to the closed state.
    ///
    /// Returns false if it was already closed.
    pub fn force_closed(&self) -> bool {
        self.inner.with_machine(|machine, _, out| machine.close(out))
    }

    /// Resets the circuit breaker's lifetime statistics.
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<P, E> Clone for CircuitBreaker<P, E>
where
    P: BreakerPolicy,
    E: std::error::Error + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _error_type: PhantomData,
        }
    }
}

impl<P, E> fmt::Debug for CircuitBreaker<P, E>
where
    P: BreakerPolicy,
    E: std::error::Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let machine = self.inner.machine.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &machine.state())
            .field("counters", &machine.counters())
            .field("config", &self.inner.config)
            .finish()
    }
}

// Implement Async support when the feature is enabled
#[cfg(feature = "async")]
impl<P, E> CircuitBreaker<P, E>
where
    P: BreakerPolicy,
    E: std::error::Error + 'static,
{
    /// Executes an async function wrapped by the circuit breaker.
    ///
    /// If the returned future is dropped while the operation is in flight the
    /// call is recorded as a failure.
    pub async fn fire_async<F, Fut, T>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let call = self.inner.admit()?;
        let result = f().await;
        call.settle(result.is_ok());

        result.map_err(BreakerError::Upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("down")]
    struct Down;

    type Breaker = CircuitBreaker<DefaultPolicy, Down>;

    fn breaker(clock: &ManualClock) -> Breaker {
        Breaker::builder()
            .failure_threshold(2)
            .open_period(Duration::from_millis(100))
            .half_open_period(Duration::from_millis(100))
            .half_open_max_calls(1)
            .clock(clock.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn panicking_probe_is_recorded_as_failure() {
        let clock = ManualClock::new();
        let breaker = breaker(&clock);
        assert!(breaker.force_open());
        clock.advance_millis(100);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = breaker.fire(|| -> Result<(), Down> { panic!("probe blew up") });
        }));

        assert!(result.is_err());
        assert_eq!(breaker.current_state(), State::Open);
        assert_eq!(breaker.statistics().total_failures, 1);
    }

    #[test]
    fn timer_driver_is_asked_for_each_deadline() {
        struct RecordingDriver(Arc<Mutex<Vec<Duration>>>);

        impl TimerDriver for RecordingDriver {
            fn schedule(
                &self,
                delay: Duration,
                _wake: Box<dyn FnOnce() + Send + 'static>,
            ) -> crate::timer::TimerHandle {
                self.0.lock().push(delay);
                crate::timer::TimerHandle::detached()
            }
        }

        let delays = Arc::new(Mutex::new(Vec::new()));
        let clock = ManualClock::new();
        let breaker = Breaker::builder()
            .open_period(Duration::from_millis(300))
            .half_open_period(Duration::from_millis(700))
            .clock(clock.clone())
            .timer_driver(RecordingDriver(Arc::clone(&delays)))
            .build()
            .unwrap();

        breaker.force_open();
        clock.advance_millis(300);
        assert_eq!(breaker.current_state(), State::HalfOpen);

        assert_eq!(
            *delays.lock(),
            vec![Duration::from_millis(300), Duration::from_millis(700)]
        );
    }

    #[test]
    fn wakeup_after_drop_is_a_noop() {
        struct StashingDriver(Arc<Mutex<Vec<Box<dyn FnOnce() + Send + 'static>>>>);

        impl TimerDriver for StashingDriver {
            fn schedule(
                &self,
                _delay: Duration,
                wake: Box<dyn FnOnce() + Send + 'static>,
            ) -> crate::timer::TimerHandle {
                self.0.lock().push(wake);
                crate::timer::TimerHandle::detached()
            }
        }

        let wakes = Arc::new(Mutex::new(Vec::new()));
        let breaker = Breaker::builder()
            .clock(ManualClock::new())
            .timer_driver(StashingDriver(Arc::clone(&wakes)))
            .build()
            .unwrap();
        breaker.force_open();
        drop(breaker);

        let pending: Vec<_> = wakes.lock().drain(..).collect();
        assert_eq!(pending.len(), 1);
        for wake in pending {
            wake();
        }
    }

    #[test]
    fn dropping_the_breaker_cancels_the_pending_wakeup() {
        struct CancelTrackingDriver(Arc<AtomicUsize>);

        impl TimerDriver for CancelTrackingDriver {
            fn schedule(
                &self,
                _delay: Duration,
                _wake: Box<dyn FnOnce() + Send + 'static>,
            ) -> crate::timer::TimerHandle {
                let cancelled = Arc::clone(&self.0);
                crate::timer::TimerHandle::new(move || {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                })
            }
        }

        let cancelled = Arc::new(AtomicUsize::new(0));
        let breaker = Breaker::builder()
            .clock(ManualClock::new())
            .timer_driver(CancelTrackingDriver(Arc::clone(&cancelled)))
            .build()
            .unwrap();
        breaker.force_open();

        let clone = breaker.clone();
        drop(breaker);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);

        drop(clone);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hooks_may_reenter_the_breaker() {
        let clock = ManualClock::new();
        let hooks = HookRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let breaker_slot: Arc<Mutex<Option<Breaker>>> = Arc::new(Mutex::new(None));

        {
            let seen = Arc::clone(&seen);
            let slot = Arc::clone(&breaker_slot);
            hooks.on_open(move || {
                if let Some(breaker) = slot.lock().as_ref() {
                    assert_eq!(breaker.current_state(), State::Open);
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let breaker = Breaker::builder()
            .clock(clock)
            .hooks(hooks)
            .build()
            .unwrap();
        *breaker_slot.lock() = Some(breaker.clone());

        breaker.force_open();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        breaker_slot.lock().take();
    }
}
