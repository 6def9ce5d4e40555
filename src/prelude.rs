//! Re-exports the types needed to build and use a breaker.
//!
//! # Example
//! ```rust
//! use cascade_guard::prelude::*;
//!
//! #[derive(Debug)]
//! struct Unavailable;
//!
//! impl std::fmt::Display for Unavailable {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("unavailable")
//!     }
//! }
//!
//! impl std::error::Error for Unavailable {}
//!
//! let breaker = CircuitBreaker::<DefaultPolicy, Unavailable>::builder().build().unwrap();
//! assert_eq!(breaker.current_state(), State::Closed);
//! ```

pub use crate::{
    BreakerConfig, BreakerError, BreakerPolicy, BreakerResult, CircuitBreaker, Clock,
    DefaultPolicy, HookRegistry, MetricSink, State, Statistics,
};
