//! Error types for the circuit breaker library.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use thiserror::Error;

/// Result type for circuit breaker operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error returned by [`CircuitBreaker::fire`](crate::CircuitBreaker::fire).
///
/// Only [`BreakerError::Upstream`] means the wrapped operation actually ran.
/// The other two variants are produced by the breaker itself before invocation.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open, calls are not permitted.
    #[error("circuit breaker is open: downstream is unresponsive, try again later")]
    CircuitOpen,

    /// The circuit is half-open and every probe slot of this episode is taken.
    #[error("circuit breaker is half-open and its probe quota is exhausted")]
    ProbeSaturated,

    /// The wrapped operation failed. The original error is carried unchanged.
    #[error("upstream operation failed: {0}")]
    Upstream(#[source] E),
}

impl<E> BreakerError<E> {
    /// Returns the kind of rejection, or `None` if the operation was invoked.
    pub fn rejection(&self) -> Option<RejectionKind> {
        match self {
            BreakerError::CircuitOpen => Some(RejectionKind::CircuitOpen),
            BreakerError::ProbeSaturated => Some(RejectionKind::ProbeSaturated),
            BreakerError::Upstream(_) => None,
        }
    }

    /// True when the breaker refused the call without invoking the operation.
    pub fn is_rejection(&self) -> bool {
        self.rejection().is_some()
    }

    /// Unwraps the upstream error, if the operation was invoked and failed.
    pub fn into_upstream(self) -> Option<E> {
        match self {
            BreakerError::Upstream(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<RejectionKind> for BreakerError<E> {
    fn from(kind: RejectionKind) -> Self {
        match kind {
            RejectionKind::CircuitOpen => BreakerError::CircuitOpen,
            RejectionKind::ProbeSaturated => BreakerError::ProbeSaturated,
        }
    }
}

/// Why the admission gate refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// The breaker is tripped.
    CircuitOpen,
    /// The half-open probe quota is used up.
    ProbeSaturated,
}

impl RejectionKind {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionKind::CircuitOpen => "circuit_open",
            RejectionKind::ProbeSaturated => "probe_saturated",
        }
    }
}

impl Display for RejectionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A breaker that trips after zero failures would never admit anything.
    #[error("failure threshold must be at least 1")]
    ZeroFailureThreshold,

    /// A half-open episode must admit at least one probe.
    #[error("half-open max calls must be at least 1")]
    ZeroProbeQuota,

    /// A period is longer than the breaker can schedule.
    #[error("{name} of {value:?} exceeds the maximum of {max:?}")]
    PeriodTooLong {
        /// Which setting was rejected.
        name: &'static str,
        /// The configured value.
        value: Duration,
        /// The largest accepted value.
        max: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error, PartialEq)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn upstream_error_is_preserved() {
        let err: BreakerError<Boom> = BreakerError::Upstream(Boom);
        assert!(!err.is_rejection());
        assert_eq!(err.to_string(), "upstream operation failed: boom");
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.into_upstream(), Some(Boom));
    }

    #[test]
    fn rejections_map_to_their_kind() {
        let open: BreakerError<Boom> = RejectionKind::CircuitOpen.into();
        let saturated: BreakerError<Boom> = RejectionKind::ProbeSaturated.into();

        assert_eq!(open.rejection(), Some(RejectionKind::CircuitOpen));
        assert_eq!(saturated.rejection(), Some(RejectionKind::ProbeSaturated));
        assert!(std::error::Error::source(&open).is_none());
        assert!(saturated.into_upstream().is_none());
    }
}
