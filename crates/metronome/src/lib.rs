// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Controllable time source for thread-based code.
//!
//! Working with time is notoriously difficult to test: sleeps slow test suites down,
//! and assertions against the real clock are flaky. This crate provides a [`Clock`]
//! abstraction that delegates to the operating system in production and, when the
//! `test-util` feature is enabled, can be driven manually through [`ClockControl`].
//!
//! The clock is used for:
//!
//! - Retrieving the current absolute time as [`SystemTime`][std::time::SystemTime].
//! - Retrieving the current monotonic time as [`Instant`][std::time::Instant].
//! - Creating [`Stopwatch`] instances that simplify elapsed-time measurements.
//!
//! # Relative and absolute time
//!
//! Prefer monotonic time ([`Clock::instant`], [`Stopwatch`]) whenever a point in time
//! does not cross process boundaries: it is unaffected by system clock adjustments.
//! Absolute time ([`Clock::system_time`]) is only appropriate for timestamps that
//! leave the process.
//!
//! # Testing
//!
//! With the `test-util` feature enabled, [`ClockControl`] freezes the flow of time
//! and lets tests jump forward deterministically:
//!
//! ```
//! # #[cfg(feature = "test-util")]
//! # {
//! use std::time::Duration;
//!
//! use metronome::ClockControl;
//!
//! let control = ClockControl::new();
//! let clock = control.to_clock();
//!
//! let start = clock.instant();
//! control.advance(Duration::from_secs(10));
//!
//! assert_eq!(clock.instant().duration_since(start), Duration::from_secs(10));
//! # }
//! ```
//!
//! Never enable `test-util` outside of `dev-dependencies`: the extra state checks
//! it compiles in are pure overhead in production.

mod clock;
#[cfg(any(feature = "test-util", test))]
mod clock_control;
mod stopwatch;

pub use clock::Clock;
#[cfg(any(feature = "test-util", test))]
pub use clock_control::ClockControl;
pub use stopwatch::Stopwatch;
