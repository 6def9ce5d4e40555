//! Hook registry for circuit breaker events.
//!
//! Hooks run on the caller's thread after the breaker lock is released, so
//! they may call back into the breaker. Several hooks can be registered for
//! the same event; they run in registration order.

use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::error::RejectionKind;
use crate::state::State;

type HookFn = Arc<dyn Fn() + Send + Sync + 'static>;
type RejectionHookFn = Arc<dyn Fn(RejectionKind) + Send + Sync + 'static>;

type Hooks<F> = RwLock<SmallVec<[F; 2]>>;

/// A registry for circuit breaker event hooks.
///
/// Hooks run after the breaker's lock is released, on the thread that caused
/// the event. Under concurrency, state hooks from different threads may run
/// out of order; use a [`MetricSink`](crate::MetricSink) to see sequence numbers.
#[derive(Default)]
pub struct HookRegistry {
    on_open: Hooks<HookFn>,
    on_close: Hooks<HookFn>,
    on_half_open: Hooks<HookFn>,
    on_success: Hooks<HookFn>,
    on_failure: Hooks<HookFn>,
    on_rejected: Hooks<RejectionHookFn>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("on_open", &self.on_open.read().len())
            .field("on_close", &self.on_close.read().len())
            .field("on_half_open", &self.on_half_open.read().len())
            .field("on_success", &self.on_success.read().len())
            .field("on_failure", &self.on_failure.read().len())
            .field("on_rejected", &self.on_rejected.read().len())
            .finish()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook to call when the circuit breaker opens.
    pub fn on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open.write().push(Arc::new(f));
    }

    /// Adds a hook to call when the circuit breaker closes.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close.write().push(Arc::new(f));
    }

    /// Adds a hook to call when the circuit breaker half-opens.
    pub fn on_half_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_half_open.write().push(Arc::new(f));
    }

    /// Adds a hook to call when an admitted call succeeds.
    pub fn on_success<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_success.write().push(Arc::new(f));
    }

    /// Adds a hook to call when an admitted call fails.
    pub fn on_failure<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_failure.write().push(Arc::new(f));
    }

    /// Adds a hook to call when a call is rejected without being invoked.
    pub fn on_rejected<F>(&self, f: F)
    where
        F: Fn(RejectionKind) + Send + Sync + 'static,
    {
        self.on_rejected.write().push(Arc::new(f));
    }

    /// Executes the appropriate hooks for a state transition.
    pub fn execute_state_transition_hook(&self, to: State) {
        let hooks = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        Self::run(hooks);
    }

    /// Executes the success hooks.
    pub fn execute_success_hook(&self) {
        Self::run(&self.on_success);
    }

    /// Executes the failure hooks.
    pub fn execute_failure_hook(&self) {
        Self::run(&self.on_failure);
    }

    /// Executes the rejection hooks.
    pub fn execute_rejected_hook(&self, kind: RejectionKind) {
        // Clone out so a hook may register further hooks.
        let hooks = self.on_rejected.read().clone();
        for hook in hooks {
            hook(kind);
        }
    }

    fn run(hooks: &Hooks<HookFn>) {
        let hooks = hooks.read().clone();
        for hook in hooks {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_registered_hook_runs() {
        let registry = HookRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            registry.on_open(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.execute_state_transition_hook(State::Open);
        registry.execute_state_transition_hook(State::Closed);

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rejected_hook_receives_kind() {
        let registry = HookRegistry::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.on_rejected(move |kind| sink.lock().push(kind));

        registry.execute_rejected_hook(RejectionKind::ProbeSaturated);

        assert_eq!(*seen.lock(), vec![RejectionKind::ProbeSaturated]);
    }
}
