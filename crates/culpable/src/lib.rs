// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Fault classification for resilience patterns.
//!
//! This crate provides types for classifying failures by **who is to blame**, enabling
//! consistent circuit-marking behavior across different error types and resilience
//! components.
//!
//! Blame metadata describes where a failure originated, not whether the operation is
//! worth retrying. A breaker only counts failures that blame the protected dependency;
//! failures caused by the caller (malformed input, cancellation, programming mistakes)
//! must pass through without moving the circuit.
//!
//! # Core Types
//!
//! - [`Blame`]: Metadata attributing a failure to the dependency, the caller, or neither.
//! - [`BlameKind`]: The attribution itself.
//! - [`Culpable`]: A trait for types that can classify themselves.
//!
//! # Examples
//!
//! ```rust
//! use culpable::{Blame, BlameKind, Culpable};
//!
//! #[derive(Debug)]
//! enum DatabaseError {
//!     ConnectionTimeout,
//!     InvalidCredentials,
//!     TableNotFound,
//! }
//!
//! impl Culpable for DatabaseError {
//!     fn blame(&self) -> Blame {
//!         match self {
//!             // The dependency failed to answer; this should mark the circuit.
//!             DatabaseError::ConnectionTimeout => Blame::dependency(),
//!             // The caller's own mistakes; the dependency is healthy.
//!             DatabaseError::InvalidCredentials => Blame::caller(),
//!             DatabaseError::TableNotFound => Blame::caller(),
//!         }
//!     }
//! }
//!
//! let error = DatabaseError::ConnectionTimeout;
//! assert_eq!(error.blame().kind(), BlameKind::Dependency);
//! assert!(error.blame().marks_circuits());
//! ```

use std::fmt::{Display, Formatter};

/// Attributes a failure to the party responsible for it.
///
/// A `Blame` value answers one question for the resilience machinery: should this
/// failure count against the protected dependency? Only [`Blame::dependency`] does.
///
/// # Examples
///
/// ```rust
/// use culpable::{Blame, BlameKind};
///
/// let blame = Blame::dependency();
/// assert_eq!(blame.kind(), BlameKind::Dependency);
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct Blame {
    kind: BlameKind,
}

/// The attribution of a failure.
///
/// To retrieve the kind from a [`Blame`] instance, use the [`Blame::kind`] method.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[non_exhaustive]
pub enum BlameKind {
    /// The origin of the failure cannot be determined.
    ///
    /// Unclassified failures are treated conservatively: they do not mark circuits,
    /// so a dependency is never punished for failures it may not have caused.
    Unknown,

    /// The protected dependency caused the failure.
    ///
    /// Timeouts, refused connections, protocol-level unavailability. These failures
    /// mark circuits.
    Dependency,

    /// The caller caused the failure.
    ///
    /// Malformed requests, constraint violations, local cancellation. The dependency
    /// is healthy; these failures never mark circuits.
    Caller,
}

impl Blame {
    /// The origin of the failure cannot be determined.
    ///
    /// Unknown blame does not mark circuits. Prefer an explicit classification
    /// whenever the error type permits one.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use culpable::{Blame, BlameKind};
    ///
    /// let blame = Blame::unknown();
    /// assert_eq!(blame.kind(), BlameKind::Unknown);
    /// assert!(!blame.marks_circuits());
    /// ```
    #[must_use]
    pub const fn unknown() -> Self {
        Self { kind: BlameKind::Unknown }
    }

    /// The protected dependency caused the failure.
    ///
    /// Use for failures that indicate the remote resource is degraded: timeouts,
    /// refused or dropped connections, explicit unavailability responses. These are
    /// the failures a circuit breaker exists to count.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use culpable::Blame;
    ///
    /// let blame = Blame::dependency();
    /// assert!(blame.marks_circuits());
    /// ```
    #[must_use]
    pub const fn dependency() -> Self {
        Self { kind: BlameKind::Dependency }
    }

    /// The caller caused the failure.
    ///
    /// Use for failures the dependency answered correctly: authentication errors,
    /// constraint violations, missing rows, or a caller-side cancellation. Counting
    /// these against the dependency would open circuits on healthy services.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use culpable::Blame;
    ///
    /// let blame = Blame::caller();
    /// assert!(!blame.marks_circuits());
    /// ```
    #[must_use]
    pub const fn caller() -> Self {
        Self { kind: BlameKind::Caller }
    }

    /// Returns the attribution.
    #[must_use]
    pub const fn kind(&self) -> BlameKind {
        self.kind
    }

    /// Whether a failure with this blame should count toward tripping a circuit.
    ///
    /// Only [`BlameKind::Dependency`] marks circuits.
    #[must_use]
    pub const fn marks_circuits(&self) -> bool {
        matches!(self.kind, BlameKind::Dependency)
    }
}

/// Enables types to classify their own failures.
///
/// Implement this trait for error types that flow through a protected resource. The
/// implementation is the single place where an adapter decides which of its failures
/// blame the dependency.
///
/// # Examples
///
/// ```rust
/// use culpable::{Blame, Culpable};
///
/// #[derive(Debug)]
/// struct Timeout;
///
/// impl Culpable for Timeout {
///     fn blame(&self) -> Blame {
///         Blame::dependency()
///     }
/// }
///
/// assert!(Timeout.blame().marks_circuits());
/// ```
pub trait Culpable {
    /// Returns the blame metadata for this failure.
    fn blame(&self) -> Blame;
}

impl Culpable for Blame {
    fn blame(&self) -> Blame {
        self.clone()
    }
}

impl Culpable for std::convert::Infallible {
    fn blame(&self) -> Blame {
        match *self {}
    }
}

/// Classifies I/O errors by their kind.
///
/// Network-shaped failures (timeouts, refused/reset/aborted connections, unreachable
/// hosts) blame the dependency; everything else is unknown. Adapters wrapping raw
/// I/O get a sensible default classification without writing their own.
impl Culpable for std::io::Error {
    fn blame(&self) -> Blame {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::TimedOut
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NetworkDown => Blame::dependency(),
            _ => Blame::unknown(),
        }
    }
}

impl Display for Blame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.kind, f)
    }
}

impl Display for BlameKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Dependency => write!(f, "dependency"),
            Self::Caller => write!(f, "caller"),
        }
    }
}
