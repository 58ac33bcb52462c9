// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Error types returned by the fusebox core.
//!
//! The core never swallows a caller's own error: a failing protected block always
//! surfaces as [`AcquireError::Inner`], with breaker bookkeeping applied as a side
//! effect when the error [blames the dependency][culpable::Blame::marks_circuits].
//! The two errors the core *adds*, [`CircuitOpen`] and [`ResourceBusy`], are
//! fast-fail signals a caller should treat as "use your fallback".

use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::ResourceName;

/// The breaker short-circuited the call without attempting it.
///
/// Callers should fall back rather than retry immediately: the breaker opened because
/// the dependency repeatedly failed, and hammering it delays recovery. The error
/// carries the message of the last classified failure so fallbacks can inspect what
/// originally went wrong.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit open for resource '{name}'")]
pub struct CircuitOpen {
    pub(crate) name: ResourceName,
    pub(crate) cause: Option<String>,
}

impl CircuitOpen {
    /// The resource whose circuit is open.
    #[must_use]
    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    /// The rendered message of the last failure that marked the circuit, if any.
    #[must_use]
    pub fn cause_message(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

/// The bulkhead had no free slot within the allowed wait.
///
/// The dependency may be healthy; the local concurrency cap is simply exhausted.
/// Callers should shed load or fall back.
#[derive(Debug, Clone, thiserror::Error)]
#[error("resource '{name}' busy: no capacity within {timeout:?}")]
pub struct ResourceBusy {
    pub(crate) name: ResourceName,
    pub(crate) timeout: Duration,
    pub(crate) waited: Duration,
}

impl ResourceBusy {
    /// The resource whose bulkhead is exhausted.
    #[must_use]
    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    /// The wait budget the caller allowed.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How long the caller actually waited before giving up.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

/// The outcome of a failed [`acquire`][crate::ProtectedResource::acquire].
///
/// `E` is the caller's own error type, propagated untouched in the
/// [`Inner`][Self::Inner] variant.
#[derive(Debug)]
pub enum AcquireError<E> {
    /// The breaker rejected the call; the protected block did not run.
    Rejected(CircuitOpen),

    /// The bulkhead rejected the call; the protected block did not run.
    Busy(ResourceBusy),

    /// The protected block ran and failed with the caller's own error.
    Inner(E),
}

impl<E> AcquireError<E> {
    /// Returns the caller's error, if the protected block ran and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(error) => Some(error),
            Self::Rejected(_) | Self::Busy(_) => None,
        }
    }

    /// Whether the call was short-circuited without running the protected block.
    #[must_use]
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Busy(_))
    }
}

impl<E: Display> Display for AcquireError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(error) => Display::fmt(error, f),
            Self::Busy(error) => Display::fmt(error, f),
            Self::Inner(error) => Display::fmt(error, f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AcquireError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rejected(_) | Self::Busy(_) => None,
            Self::Inner(error) => Some(error),
        }
    }
}

/// Configuration misuse detected when options are validated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum OptionsError {
    /// A required option was not provided.
    #[error("`{0}` must be provided")]
    Missing(&'static str),

    /// An option that must be positive was zero or negative.
    #[error("`{0}` must be positive")]
    NotPositive(&'static str),

    /// An option fell outside its valid range.
    #[error("`{name}` must lie within {range}, got {value}")]
    OutOfRange {
        /// The offending option.
        name: &'static str,
        /// The human-readable valid range.
        range: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// `lumping_interval · (error_threshold − 1)` exceeded `error_threshold_timeout`,
    /// which would make the failure window impossible to fill.
    #[error("lumping_interval {lumping:?} is too coarse for error_threshold {threshold} within {timeout:?}")]
    LumpingTooCoarse {
        /// The configured lumping interval.
        lumping: Duration,
        /// The configured failure-window size.
        threshold: u32,
        /// The configured failure-window span.
        timeout: Duration,
    },

    /// Exactly one of `tickets` and `quota` must size a bulkhead.
    #[error("bulkhead sizing requires exactly one of `tickets` and `quota`")]
    AmbiguousBulkheadSize,
}

/// Registration through the [`Engine`][crate::Engine] failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegisterError {
    /// The supplied options did not validate.
    #[error(transparent)]
    Options(#[from] OptionsError),

    /// The engine has been shut down and no longer accepts registrations.
    #[error("engine has been shut down")]
    ShutDown,
}
