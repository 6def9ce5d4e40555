//! Cooldown scheduling.
//!
//! The breaker owns at most one pending delayed transition. A pending timer is
//! a deadline plus, when a [`TimerDriver`] is configured, a handle to the task
//! that will wake the breaker at that deadline. Without a driver the deadline
//! is applied the next time anyone touches the breaker.

use std::fmt;
use std::time::{Duration, Instant};

/// The two kinds of delayed transition the breaker schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// Open to half-open, armed when the breaker trips.
    Open,
    /// Half-open fallback close, armed when probing starts.
    HalfOpen,
}

/// Cancellation handle for a wakeup scheduled by a [`TimerDriver`].
///
/// Cancelling a wakeup that already ran must be harmless.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    /// Creates a handle that runs `cancel` when the wakeup is superseded.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Cancels the wakeup.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Something that can call back into the breaker after a delay.
///
/// `wake` must run on another task or thread, never inline inside `schedule`:
/// the breaker holds its lock while scheduling.
pub trait TimerDriver: Send + Sync + 'static {
    /// Runs `wake` once `delay` has elapsed, unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, wake: Box<dyn FnOnce() + Send + 'static>) -> TimerHandle;
}

/// Timer driver that spawns one sleeping task per pending deadline on a tokio runtime.
#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
#[derive(Debug, Clone)]
pub struct TokioTimerDriver {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "async")]
impl TokioTimerDriver {
    /// Creates a driver spawning on the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a driver for the runtime the caller is running on.
    pub fn try_current() -> Result<Self, tokio::runtime::TryCurrentError> {
        tokio::runtime::Handle::try_current().map(Self::new)
    }
}

#[cfg(feature = "async")]
impl TimerDriver for TokioTimerDriver {
    fn schedule(&self, delay: Duration, wake: Box<dyn FnOnce() + Send + 'static>) -> TimerHandle {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            wake();
        });
        TimerHandle::new(move || task.abort())
    }
}

/// Identifies one arming of a timer, so a late driver handle cannot attach to
/// a newer timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerId(u64);

#[derive(Debug)]
struct PendingTimer {
    id: TimerId,
    slot: TimerSlot,
    deadline: Instant,
    handle: Option<TimerHandle>,
}

impl PendingTimer {
    fn cancel(self) {
        if let Some(handle) = self.handle {
            handle.cancel();
        }
    }
}

/// Holds the single pending delayed transition.
#[derive(Debug, Default)]
pub(crate) struct CooldownScheduler {
    pending: Option<PendingTimer>,
    next_id: u64,
}

impl CooldownScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arms `slot` to fire at `deadline`. Any other pending timer is cancelled
    /// first, so at most one slot is ever armed.
    pub(crate) fn arm(&mut self, slot: TimerSlot, deadline: Instant) -> TimerId {
        debug_assert!(
            self.armed() != Some(slot),
            "{slot:?} timer armed twice without a transition in between"
        );
        if let Some(previous) = self.pending.take() {
            previous.cancel();
        }

        let id = TimerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.pending = Some(PendingTimer {
            id,
            slot,
            deadline,
            handle: None,
        });
        id
    }

    /// Cancels the pending timer if it belongs to `slot`. Returns false when
    /// there was nothing to cancel, e.g. because the timer already fired.
    pub(crate) fn cancel(&mut self, slot: TimerSlot) -> bool {
        match self.pending.take() {
            Some(pending) if pending.slot == slot => {
                pending.cancel();
                true
            }
            other => {
                self.pending = other;
                false
            }
        }
    }

    /// Cancels whatever is pending.
    pub(crate) fn cancel_any(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes and returns the pending timer if its deadline has passed.
    pub(crate) fn take_due(&mut self, now: Instant) -> Option<(TimerSlot, Instant)> {
        if self.pending.as_ref()?.deadline > now {
            return None;
        }
        let fired = self.pending.take()?;
        let due = (fired.slot, fired.deadline);
        // The driver task may still be sleeping if the deadline was noticed first by a caller.
        fired.cancel();
        Some(due)
    }

    /// The slot currently armed, if any.
    pub(crate) fn armed(&self) -> Option<TimerSlot> {
        self.pending.as_ref().map(|pending| pending.slot)
    }

    /// Deadline of the pending timer, if any.
    #[cfg(test)]
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    /// The pending timer if no driver wakeup has been attached to it yet.
    pub(crate) fn unattached(&self) -> Option<(TimerId, Instant)> {
        self.pending
            .as_ref()
            .filter(|pending| pending.handle.is_none())
            .map(|pending| (pending.id, pending.deadline))
    }

    /// Forgets the driver wakeup of timer `id` without cancelling it, so a
    /// new one can be attached. Used when a wakeup ran before its deadline.
    pub(crate) fn release(&mut self, id: TimerId) {
        if let Some(pending) = self.pending.as_mut().filter(|pending| pending.id == id) {
            pending.handle = None;
        }
    }

    /// Attaches a driver wakeup to timer `id`. If that timer is gone the
    /// wakeup is cancelled straight away.
    pub(crate) fn attach(&mut self, id: TimerId, handle: TimerHandle) {
        match self.pending.as_mut() {
            Some(pending) if pending.id == id && pending.handle.is_none() => {
                pending.handle = Some(handle);
            }
            _ => handle.cancel(),
        }
    }
}
