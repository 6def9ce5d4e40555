//! Circuit breaker state machine implementation.
//!
//! [`StateMachine`] is plain data. The breaker keeps it behind a single mutex
//! and every admission, outcome and timer firing goes through it, so a
//! transition and the counter resets it implies are always observed together.

use std::fmt::{self, Display, Formatter};
use std::time::Instant;

use smallvec::SmallVec;

use crate::config::BreakerConfig;
use crate::error::RejectionKind;
use crate::policy::BreakerPolicy;
use crate::timer::{CooldownScheduler, TimerSlot};

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed,

    /// Circuit is open and operations are rejected.
    Open,

    /// Circuit is allowing a limited number of operations to test recovery.
    HalfOpen,
}

impl State {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters that drive transitions.
///
/// All three are zeroed on every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub(crate) consecutive_failures: u32,
    pub(crate) probes_issued: u32,
    pub(crate) probes_succeeded: u32,
}

impl Counters {
    /// Closed-state failures since the circuit last closed.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Probes admitted in the current half-open episode.
    pub fn probes_issued(&self) -> u32 {
        self.probes_issued
    }

    /// Probes of the current half-open episode that succeeded.
    pub fn probes_succeeded(&self) -> u32 {
        self.probes_succeeded
    }
}

/// A state change applied by the breaker.
///
/// Transitions are published after the breaker's lock is released, so two
/// threads can deliver theirs in a different order than they were applied.
/// `sequence` increases by one per transition and restores that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: State,
    /// State after the change.
    pub to: State,
    /// Position of this transition in the breaker's history, starting at 1.
    pub sequence: u64,
}

pub(crate) type Transitions = SmallVec<[Transition; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Normal,
    Probe,
}

/// Proof of admission. Carries the episode it was issued in so that an outcome
/// arriving after the breaker moved on does not touch the new episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    pub(crate) kind: CallKind,
    epoch: u64,
}

impl Ticket {
    pub(crate) fn is_probe(&self) -> bool {
        self.kind == CallKind::Probe
    }
}

#[derive(Debug)]
pub(crate) struct StateMachine {
    state: State,
    counters: Counters,
    epoch: u64,
    scheduler: CooldownScheduler,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Closed,
            counters: Counters::default(),
            epoch: 0,
            scheduler: CooldownScheduler::new(),
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn counters(&self) -> Counters {
        self.counters
    }

    pub(crate) fn scheduler(&self) -> &CooldownScheduler {
        &self.scheduler
    }

    pub(crate) fn scheduler_mut(&mut self) -> &mut CooldownScheduler {
        &mut self.scheduler
    }

    /// Applies every scheduled transition whose deadline is at or before `now`.
    ///
    /// A half-open deadline is measured from when the open timer was due, not
    /// from when it was noticed, so an idle breaker passes through half-open
    /// and closes exactly as if the timers had fired on time.
    pub(crate) fn advance(&mut self, now: Instant, config: &BreakerConfig, out: &mut Transitions) {
        while let Some((slot, due_at)) = self.scheduler.take_due(now) {
            match (slot, self.state) {
                (TimerSlot::Open, State::Open) => self.enter_half_open(due_at, config, out),
                (TimerSlot::HalfOpen, State::HalfOpen) => {
                    self.close(out);
                }
                // A timer that outlived its state; nothing to do.
                _ => {}
            }
        }
    }

    /// Admission gate.
    pub(crate) fn admit(&mut self, config: &BreakerConfig) -> Result<Ticket, RejectionKind> {
        match self.state {
            State::Closed => Ok(self.ticket(CallKind::Normal)),
            State::Open => Err(RejectionKind::CircuitOpen),
            State::HalfOpen => {
                if self.counters.probes_issued >= config.half_open_max_calls {
                    return Err(RejectionKind::ProbeSaturated);
                }
                self.counters.probes_issued += 1;
                Ok(self.ticket(CallKind::Probe))
            }
        }
    }

    /// Records a successful call. Returns false if the ticket is stale.
    pub(crate) fn record_success<P: BreakerPolicy>(
        &mut self,
        ticket: Ticket,
        policy: &P,
        config: &BreakerConfig,
        out: &mut Transitions,
    ) -> bool {
        if !self.is_current(ticket) {
            return false;
        }

        match ticket.kind {
            CallKind::Normal => {
                if policy.success_resets_failures() {
                    self.counters.consecutive_failures = 0;
                }
            }
            CallKind::Probe => {
                self.counters.probes_succeeded += 1;
                if policy.should_close(&self.counters, config) {
                    self.close(out);
                }
            }
        }
        true
    }

    /// Records a failed call. Returns false if the ticket is stale.
    pub(crate) fn record_failure<P: BreakerPolicy>(
        &mut self,
        ticket: Ticket,
        policy: &P,
        config: &BreakerConfig,
        now: Instant,
        out: &mut Transitions,
    ) -> bool {
        if !self.is_current(ticket) {
            return false;
        }

        match ticket.kind {
            CallKind::Probe => {
                // One failed probe is enough, whatever the others did.
                self.trip(now, config, out);
            }
            CallKind::Normal => {
                self.counters.consecutive_failures += 1;
                if policy.should_trip(&self.counters, config) {
                    self.trip(now, config, out);
                }
            }
        }
        true
    }

    /// Moves to open and starts a full cooldown. No-op if already open.
    pub(crate) fn trip(&mut self, now: Instant, config: &BreakerConfig, out: &mut Transitions) -> bool {
        if self.state == State::Open {
            return false;
        }
        self.scheduler.cancel(TimerSlot::HalfOpen);
        self.move_to(State::Open, out);
        self.scheduler.arm(TimerSlot::Open, now + config.open_period);
        true
    }

    /// Moves to closed. No-op if already closed.
    pub(crate) fn close(&mut self, out: &mut Transitions) -> bool {
        if self.state == State::Closed {
            return false;
        }
        self.scheduler.cancel_any();
        self.move_to(State::Closed, out);
        true
    }

    fn enter_half_open(&mut self, opened_until: Instant, config: &BreakerConfig, out: &mut Transitions) {
        self.move_to(State::HalfOpen, out);
        self.scheduler
            .arm(TimerSlot::HalfOpen, opened_until + config.half_open_period);
    }

    fn move_to(&mut self, to: State, out: &mut Transitions) {
        self.epoch = self.epoch.wrapping_add(1);
        out.push(Transition {
            from: self.state,
            to,
            sequence: self.epoch,
        });
        self.state = to;
        self.counters = Counters::default();
    }

    fn ticket(&self, kind: CallKind) -> Ticket {
        Ticket {
            kind,
            epoch: self.epoch,
        }
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        ticket.epoch == self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DefaultPolicy;
    use std::time::Duration;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            open_period: Duration::from_millis(100),
            half_open_period: Duration::from_millis(50),
            half_open_max_calls: 2,
        }
    }

    fn tripped(start: Instant) -> StateMachine {
        let mut machine = StateMachine::new();
        let mut out = Transitions::new();
        for _ in 0..3 {
            let ticket = machine.admit(&config()).unwrap();
            machine.record_failure(ticket, &DefaultPolicy::new(), &config(), start, &mut out);
        }
        assert_eq!(machine.state(), State::Open);
        machine
    }

    #[test]
    fn starts_closed_with_nothing_armed() {
        let machine = StateMachine::new();
        assert_eq!(machine.state(), State::Closed);
        assert_eq!(machine.counters(), Counters::default());
        assert_eq!(machine.scheduler().armed(), None);
    }

    #[test]
    fn trips_on_threshold_and_arms_open_timer() {
        let start = Instant::now();
        let machine = tripped(start);

        assert_eq!(machine.counters().consecutive_failures(), 0);
        assert_eq!(machine.scheduler().armed(), Some(TimerSlot::Open));
        assert_eq!(
            machine.scheduler().deadline(),
            Some(start + Duration::from_millis(100))
        );
    }

    #[test]
    fn successes_do_not_clear_failures_by_default() {
        let start = Instant::now();
        let mut machine = StateMachine::new();
        let mut out = Transitions::new();
        let policy = DefaultPolicy::new();

        for outcome in [false, true, false, true, false] {
            let ticket = machine.admit(&config()).unwrap();
            if outcome {
                machine.record_success(ticket, &policy, &config(), &mut out);
            } else {
                machine.record_failure(ticket, &policy, &config(), start, &mut out);
            }
        }

        assert_eq!(machine.state(), State::Open);
    }

    #[test]
    fn resetting_policy_needs_an_unbroken_streak() {
        let start = Instant::now();
        let mut machine = StateMachine::new();
        let mut out = Transitions::new();
        let policy = DefaultPolicy::new().reset_on_success(true);

        for outcome in [false, false, true, false, false] {
            let ticket = machine.admit(&config()).unwrap();
            if outcome {
                machine.record_success(ticket, &policy, &config(), &mut out);
            } else {
                machine.record_failure(ticket, &policy, &config(), start, &mut out);
            }
        }

        assert_eq!(machine.state(), State::Closed);
        assert_eq!(machine.counters().consecutive_failures(), 2);
    }

    #[test]
    fn open_rejects_until_timer_fires() {
        let start = Instant::now();
        let mut machine = tripped(start);
        let mut out = Transitions::new();

        machine.advance(start + Duration::from_millis(99), &config(), &mut out);
        assert_eq!(machine.admit(&config()), Err(RejectionKind::CircuitOpen));

        machine.advance(start + Duration::from_millis(100), &config(), &mut out);
        assert_eq!(machine.state(), State::HalfOpen);
        assert_eq!(machine.scheduler().armed(), Some(TimerSlot::HalfOpen));
        assert_eq!(
            out.as_slice(),
            &[Transition {
                from: State::Open,
                to: State::HalfOpen,
                sequence: 2,
            }]
        );
    }

    #[test]
    fn half_open_caps_probes() {
        let start = Instant::now();
        let mut machine = tripped(start);
        let mut out = Transitions::new();
        machine.advance(start + Duration::from_millis(100), &config(), &mut out);

        assert!(machine.admit(&config()).unwrap().is_probe());
        assert!(machine.admit(&config()).unwrap().is_probe());
        assert_eq!(machine.admit(&config()), Err(RejectionKind::ProbeSaturated));
        assert_eq!(machine.counters().probes_issued(), 2);
    }

    #[test]
    fn all_probes_succeeding_closes() {
        let start = Instant::now();
        let mut machine = tripped(start);
        let mut out = Transitions::new();
        let policy = DefaultPolicy::new();
        machine.advance(start + Duration::from_millis(100), &config(), &mut out);

        let first = machine.admit(&config()).unwrap();
        let second = machine.admit(&config()).unwrap();
        machine.record_success(first, &policy, &config(), &mut out);
        assert_eq!(machine.state(), State::HalfOpen);
        machine.record_success(second, &policy, &config(), &mut out);

        assert_eq!(machine.state(), State::Closed);
        assert_eq!(machine.counters(), Counters::default());
        assert_eq!(machine.scheduler().armed(), None);
    }

    #[test]
    fn probe_failure_reopens_with_fresh_cooldown() {
        let start = Instant::now();
        let mut machine = tripped(start);
        let mut out = Transitions::new();
        let policy = DefaultPolicy::new();
        let probing_at = start + Duration::from_millis(100);
        machine.advance(probing_at, &config(), &mut out);

        let ok = machine.admit(&config()).unwrap();
        let bad = machine.admit(&config()).unwrap();
        machine.record_success(ok, &policy, &config(), &mut out);
        let failed_at = probing_at + Duration::from_millis(10);
        machine.record_failure(bad, &policy, &config(), failed_at, &mut out);

        assert_eq!(machine.state(), State::Open);
        assert_eq!(machine.scheduler().armed(), Some(TimerSlot::Open));
        assert_eq!(
            machine.scheduler().deadline(),
            Some(failed_at + Duration::from_millis(100))
        );
    }

    #[test]
    fn half_open_closes_at_fallback_deadline() {
        let start = Instant::now();
        let mut machine = tripped(start);
        let mut out = Transitions::new();

        // Nobody looked at the breaker for a while: both timers are due.
        machine.advance(start + Duration::from_millis(150), &config(), &mut out);

        assert_eq!(machine.state(), State::Closed);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].to, State::Closed);
    }

    #[test]
    fn half_open_deadline_counts_from_open_deadline() {
        let start = Instant::now();
        let mut machine = tripped(start);
        let mut out = Transitions::new();

        machine.advance(start + Duration::from_millis(149), &config(), &mut out);
        assert_eq!(machine.state(), State::HalfOpen);
        machine.advance(start + Duration::from_millis(150), &config(), &mut out);
        assert_eq!(machine.state(), State::Closed);
    }

    #[test]
    fn stale_probe_outcome_is_ignored() {
        let start = Instant::now();
        let mut machine = tripped(start);
        let mut out = Transitions::new();
        let policy = DefaultPolicy::new();
        machine.advance(start + Duration::from_millis(100), &config(), &mut out);

        let late = machine.admit(&config()).unwrap();
        machine.advance(start + Duration::from_millis(150), &config(), &mut out);
        assert_eq!(machine.state(), State::Closed);

        let now = start + Duration::from_millis(160);
        assert!(!machine.record_failure(late, &policy, &config(), now, &mut out));
        assert_eq!(machine.state(), State::Closed);
        assert_eq!(machine.counters().consecutive_failures(), 0);
    }

    #[test]
    fn repeated_trip_is_idempotent() {
        let start = Instant::now();
        let mut machine = StateMachine::new();
        let mut out = Transitions::new();
        let policy = DefaultPolicy::new();

        let tickets: Vec<_> = (0..6).map(|_| machine.admit(&config()).unwrap()).collect();
        for ticket in tickets {
            machine.record_failure(ticket, &policy, &config(), start, &mut out);
        }

        assert_eq!(out.len(), 1);
        assert_eq!(machine.scheduler().armed(), Some(TimerSlot::Open));
        assert!(!machine.trip(start, &config(), &mut out));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn close_from_open_cancels_open_timer() {
        let start = Instant::now();
        let mut machine = tripped(start);
        let mut out = Transitions::new();

        assert!(machine.close(&mut out));
        assert_eq!(machine.scheduler().armed(), None);
        assert!(!machine.close(&mut out));
    }
}
