// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Circuit breakers: the per-resource decision of whether a call may proceed.
//!
//! Three breakers coexist in this module:
//!
//! - [`ClassicBreaker`]: the familiar three-state machine. Failures fill a bounded
//!   window; a full window opens the circuit; after a timeout a half-open probe
//!   phase decides between closing again and re-opening.
//! - [`AdaptiveBreaker`]: no discrete states. A windowed controller maintains a
//!   continuous rejection probability, so degradation sheds a *fraction* of traffic
//!   proportional to how far the error rate exceeds the resource's baseline.
//! - [`DualBreaker`]: runs one of each side by side for the same resource, routes
//!   every call to one of them through a selector, and feeds outcomes to both so
//!   the inactive breaker stays warm for a flip.
//!
//! [`Breaker`] is the tagged dispatch over the three (plus an unprotected
//! pass-through used when breakers are disabled by environment switch).
//!
//! # The classic state machine
//!
//! ```text
//! ┌────────┐      failure window fills        ┌──────────┐
//! │ Closed │ ────────────────────────────────▶│   Open   │
//! └────────┘                                  └──────────┘
//!      ▲                                            │
//!      │ success_threshold                          │ error_timeout elapsed
//!      │ successes                                  │ since last failure
//!      │            ┌────────────────┐              │
//!      └────────────│   Half-Open    │◀─────────────┘
//!                   └────────────────┘
//!                          │
//!                          └── any failure ──▶ Open
//! ```
//!
//! # Adaptive states
//!
//! The adaptive breaker reports the same three states, derived from its rejection
//! rate: `1.0` is open, `0.0` is closed, anything between is half-open.

mod adaptive;
mod classic;
mod dual;

pub use adaptive::AdaptiveBreaker;
pub use classic::ClassicBreaker;
pub use dual::DualBreaker;

use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::ResourceName;
use crate::callbacks::define_fn_wrapper;
use crate::pid::PidMetrics;

define_fn_wrapper!(OnStateChange(Fn(state: CircuitState)));
define_fn_wrapper!(OnModeChange(Fn(old: BreakerMode, new: BreakerMode)));
define_fn_wrapper!(Selector(Fn(name: &ResourceName) -> bool));

/// The discrete state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CircuitState {
    /// Normal operation; requests pass through.
    Closed,

    /// The circuit is broken; requests are rejected without running.
    Open,

    /// Probing whether the dependency has recovered.
    HalfOpen,
}

impl CircuitState {
    /// The state as a telemetry-friendly string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which child of a [`DualBreaker`] is authoritative for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BreakerMode {
    /// The classic three-state breaker decides.
    Classic,

    /// The adaptive controller-based breaker decides.
    Adaptive,
}

impl BreakerMode {
    /// The mode as a telemetry-friendly string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Adaptive => "adaptive",
        }
    }
}

impl Display for BreakerMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time view of a classic breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassicMetrics {
    /// The current circuit state.
    pub state: CircuitState,
    /// Failures currently inside the window.
    pub window_failures: usize,
    /// Successes counted toward closing while half-open.
    pub half_open_successes: u32,
    /// The rendered message of the last recorded failure.
    pub last_error: Option<String>,
}

/// A point-in-time view of whichever breaker protects a resource.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BreakerMetrics {
    /// The resource is protected by a classic breaker.
    Classic(ClassicMetrics),

    /// The resource is protected by an adaptive breaker.
    Adaptive(PidMetrics),

    /// The resource runs both breakers; both views are merged.
    Dual {
        /// The child currently authoritative for calls.
        active: BreakerMode,
        /// The classic child's view.
        classic: ClassicMetrics,
        /// The adaptive child's view.
        adaptive: PidMetrics,
    },

    /// The resource has no breaker.
    Unprotected,
}

/// Tagged dispatch over the breaker kinds protecting a resource.
///
/// The variant is fixed at registration from
/// [`BreakerChoice`][crate::options::BreakerChoice]; `Unprotected` is also what the
/// environment kill-switches collapse to.
#[derive(Debug)]
pub enum Breaker {
    /// A classic three-state breaker.
    Classic(ClassicBreaker),

    /// An adaptive controller-based breaker.
    Adaptive(AdaptiveBreaker),

    /// Both breakers side by side behind a selector.
    Dual(DualBreaker),

    /// No protection; every request is allowed.
    Unprotected,
}

impl Breaker {
    /// Whether the next request may proceed.
    ///
    /// For the classic breaker this also performs the open → half-open transition
    /// once the error timeout has elapsed. For the adaptive breaker a rejection is
    /// counted toward the current window.
    #[must_use]
    pub fn request_allowed(&self) -> bool {
        match self {
            Self::Classic(breaker) => breaker.request_allowed(),
            Self::Adaptive(breaker) => breaker.request_allowed(),
            Self::Dual(breaker) => breaker.request_allowed(),
            Self::Unprotected => true,
        }
    }

    /// Records a successful call.
    pub fn mark_success(&self) {
        match self {
            Self::Classic(breaker) => breaker.mark_success(),
            Self::Adaptive(breaker) => breaker.mark_success(),
            Self::Dual(breaker) => breaker.mark_success(),
            Self::Unprotected => {}
        }
    }

    /// Records a call that failed with a dependency-blamed fault.
    pub fn mark_failed(&self, message: &str) {
        match self {
            Self::Classic(breaker) => breaker.mark_failed(message),
            Self::Adaptive(breaker) => breaker.mark_failed(message),
            Self::Dual(breaker) => breaker.mark_failed(message),
            Self::Unprotected => {}
        }
    }

    /// Forces the breaker back to its pristine closed state.
    pub fn reset(&self) {
        match self {
            Self::Classic(breaker) => breaker.reset(),
            Self::Adaptive(breaker) => breaker.reset(),
            Self::Dual(breaker) => breaker.reset(),
            Self::Unprotected => {}
        }
    }

    /// The current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self {
            Self::Classic(breaker) => breaker.state(),
            Self::Adaptive(breaker) => breaker.state(),
            Self::Dual(breaker) => breaker.state(),
            Self::Unprotected => CircuitState::Closed,
        }
    }

    /// Whether the circuit is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Whether the circuit is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Whether the circuit is half-open.
    #[must_use]
    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Whether the breaker has observed recent activity.
    #[must_use]
    pub fn in_use(&self) -> bool {
        match self {
            Self::Classic(breaker) => breaker.in_use(),
            Self::Adaptive(breaker) => breaker.in_use(),
            Self::Dual(breaker) => breaker.in_use(),
            Self::Unprotected => false,
        }
    }

    /// The rendered message of the last recorded failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        match self {
            Self::Classic(breaker) => breaker.last_error(),
            Self::Adaptive(breaker) => breaker.last_error(),
            Self::Dual(breaker) => breaker.last_error(),
            Self::Unprotected => None,
        }
    }

    /// The reduced trial-call timeout, when the breaker is probing.
    #[must_use]
    pub fn half_open_resource_timeout(&self) -> Option<Duration> {
        match self {
            Self::Classic(breaker) => breaker.half_open_resource_timeout(),
            Self::Adaptive(_) | Self::Unprotected => None,
            Self::Dual(breaker) => breaker.half_open_resource_timeout(),
        }
    }

    /// A point-in-time view of the breaker.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        match self {
            Self::Classic(breaker) => BreakerMetrics::Classic(breaker.metrics()),
            Self::Adaptive(breaker) => BreakerMetrics::Adaptive(breaker.metrics()),
            Self::Dual(breaker) => breaker.metrics(),
            Self::Unprotected => BreakerMetrics::Unprotected,
        }
    }

    /// Tears the breaker down: background registrations are dropped and learned
    /// state is discarded.
    pub fn destroy(&self) {
        match self {
            Self::Classic(breaker) => breaker.reset(),
            Self::Adaptive(breaker) => breaker.destroy(),
            Self::Dual(breaker) => breaker.destroy(),
            Self::Unprotected => {}
        }
    }
}
