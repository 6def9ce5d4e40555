//! # cascade-guard
//!
//! A call-admission circuit breaker. It wraps a fallible operation, counts its
//! failures and, once they reach a threshold, stops invoking it for a cooldown
//! period before cautiously probing recovery.
//!
//! ## States
//!
//! - **Closed**: Normal operation. Calls pass through to the protected resource.
//! - **Open**: Calls are rejected with [`BreakerError::CircuitOpen`] without
//!   reaching the resource. Entered after `failure_threshold` failures; left
//!   only when the cooldown timer fires.
//! - **Half-Open**: Up to `half_open_max_calls` probes are admitted. Later calls
//!   get [`BreakerError::ProbeSaturated`]. One failed probe re-opens the circuit
//!   with a fresh cooldown; `half_open_max_calls` successful probes, or the end
//!   of the half-open period, close it.
//!
//! All bookkeeping (admission decisions, counters, timer-driven transitions)
//! happens under a single lock. The wrapped operation itself runs outside it.
//!
//! ## Basic Usage
//!
//! ```rust
//! use cascade_guard::{BreakerError, CircuitBreaker, DefaultPolicy};
//! use std::error::Error;
//! use std::fmt;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct ServiceError(String);
//!
//! impl fmt::Display for ServiceError {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         write!(f, "Service error: {}", self.0)
//!     }
//! }
//!
//! impl Error for ServiceError {}
//!
//! let breaker = CircuitBreaker::<DefaultPolicy, ServiceError>::builder()
//!     .failure_threshold(10)
//!     .open_period(Duration::from_secs(2))
//!     .half_open_period(Duration::from_secs(2))
//!     .half_open_max_calls(5)
//!     .build()
//!     .expect("valid configuration");
//!
//! match breaker.fire(|| Ok::<_, ServiceError>("Success".to_string())) {
//!     Ok(result) => println!("Call succeeded: {}", result),
//!     Err(BreakerError::CircuitOpen) => println!("Circuit is open, call was prevented"),
//!     Err(BreakerError::ProbeSaturated) => println!("Recovering, try again later"),
//!     Err(BreakerError::Upstream(err)) => println!("Call failed: {}", err),
//! }
//! ```
//!
//! ## Timers
//!
//! Cooldown deadlines are measured with a [`Clock`]. Without a
//! [`TimerDriver`] an elapsed deadline is applied the next time the breaker is
//! used or inspected, which is indistinguishable for callers. With a driver
//! (for example [`TokioTimerDriver`] under the `async` feature) the breaker is
//! woken at each deadline, so hooks and metrics see transitions on time.
//!
//! ## Features
//!
//! - `tracing` - Log transitions and rejections with `tracing` (default)
//! - `async` - `fire_async`, plus a tokio clock and timer driver

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod clock;
mod config;
mod error;
mod hook;
mod metrics;
mod policy;
pub mod prelude;
mod state;
mod timer;

// Re-exports
pub use breaker::CircuitBreaker;
#[cfg(feature = "async")]
pub use clock::TokioClock;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BreakerBuilder, BreakerConfig, DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_MAX_CALLS,
    DEFAULT_HALF_OPEN_PERIOD, DEFAULT_OPEN_PERIOD, MAX_PERIOD,
};
pub use error::{BreakerError, BreakerResult, ConfigError, RejectionKind};
pub use hook::HookRegistry;
#[cfg(feature = "tracing")]
pub use metrics::TracingSink;
pub use metrics::{MetricSink, NullMetricSink, Statistics};
pub use policy::{BreakerPolicy, DefaultPolicy};
pub use state::{Counters, State, Transition};
#[cfg(feature = "async")]
pub use timer::TokioTimerDriver;
pub use timer::{TimerDriver, TimerHandle, TimerSlot};
