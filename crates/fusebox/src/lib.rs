// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Client-side resilience: circuit breakers and bulkheads for misbehaving
//! dependencies.
//!
//! When a remote dependency degrades, threads pile up waiting on it, and the outage
//! cascades into the calling process. This crate shields callers per named resource
//! with two cooperating mechanisms:
//!
//! - a **circuit breaker** decides, on every call, whether the call should even be
//!   attempted; when the dependency keeps failing, calls fail fast instead;
//! - a **bulkhead** caps the number of in-flight calls, so one slow dependency can
//!   exhaust only its own ticket budget, never the whole worker pool.
//!
//! # Core Types
//!
//! - [`Engine`]: the process-wide handle owning the resource registry, the
//!   notification bus, and the background scheduler. No globals; create one at
//!   startup, a fresh one per test.
//! - [`ProtectedResource`]: a named resource; wrap every outbound operation in
//!   [`acquire`][ProtectedResource::acquire].
//! - [`options::ResourceOptions`]: breaker choice plus bulkhead sizing, validated
//!   before anything is constructed.
//! - [`Blame`] / [`Culpable`] (from the `culpable` crate): how adapters classify
//!   which of their errors mark circuits.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use culpable::{Blame, Culpable};
//! use fusebox::options::{ClassicOptions, ResourceOptions};
//! use fusebox::{AcquireArgs, AcquireError, Engine};
//! use metronome::Clock;
//!
//! #[derive(Debug)]
//! enum ApiError {
//!     Timeout,
//!     InvalidRequest,
//! }
//!
//! impl Culpable for ApiError {
//!     fn blame(&self) -> Blame {
//!         match self {
//!             ApiError::Timeout => Blame::dependency(),
//!             ApiError::InvalidRequest => Blame::caller(),
//!         }
//!     }
//! }
//!
//! let engine = Engine::new(&Clock::new());
//!
//! let options = ResourceOptions::classic(
//!     ClassicOptions::builder()
//!         .error_threshold(3)
//!         .error_timeout(Duration::from_secs(15))
//!         .success_threshold(2)
//!         .build()?,
//! )
//! .with_tickets(4);
//!
//! let api = engine.register("payments_api", options)?;
//!
//! match api.acquire(AcquireArgs::new().with_scope("charge"), |_| {
//!     // ... perform the outbound call here ...
//!     Ok::<_, ApiError>("charged")
//! }) {
//!     Ok(receipt) => println!("{receipt}"),
//!     Err(AcquireError::Rejected(open)) => println!("fast-fail: {open}"),
//!     Err(AcquireError::Busy(busy)) => println!("shed load: {busy}"),
//!     Err(AcquireError::Inner(error)) => println!("caller error: {error:?}"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Two Breakers
//!
//! The [classic breaker][breaker::ClassicBreaker] is a three-state machine: a full
//! failure window opens the circuit, a timeout leads to a half-open probe phase, and
//! consecutive successes close it again. The
//! [adaptive breaker][breaker::AdaptiveBreaker] replaces the discrete states with a
//! continuous rejection probability driven by a windowed controller, shedding a
//! fraction of traffic proportional to how far the error rate exceeds the
//! resource's learned baseline. A [dual breaker][breaker::DualBreaker] runs both
//! side by side and routes each call through a selector, which is how a fleet
//! migrates from one to the other gradually.
//!
//! # Events
//!
//! State transitions, rejections, successes, and registry evictions are published
//! synchronously on the engine's [`bus`][bus::NotificationBus]. Subscribers must be
//! fast and non-blocking; a slow subscriber slows every publisher.
//!
//! # Time
//!
//! All timing flows through [`metronome::Clock`], so tests drive breakers
//! deterministically with `metronome::ClockControl` (the `test-util` feature of
//! that crate).
//!
//! # Features
//!
//! - `serde`: derives `Serialize`/`Deserialize` on options and metric snapshots.

pub use culpable::{Blame, BlameKind, Culpable};

pub mod breaker;
pub mod bus;
pub mod error;
pub mod estimator;
pub mod options;
pub mod pid;
pub mod window;

mod bulkhead;
mod callbacks;
mod constants;
mod engine;
mod name;
mod registry;
mod resource;
mod rnd;
mod scheduler;

pub use bulkhead::{Bulkhead, BulkheadFull, BulkheadPermit};
pub use engine::{Engine, EngineBuilder, Environment};
pub use error::{AcquireError, CircuitOpen, OptionsError, RegisterError, ResourceBusy};
pub use name::ResourceName;
pub use resource::{AcquireArgs, Call, ProtectedResource};
