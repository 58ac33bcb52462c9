// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use culpable::Culpable;
use metronome::Clock;

use crate::breaker::{Breaker, BreakerMetrics, CircuitState};
use crate::bulkhead::Bulkhead;
use crate::bus::{Event, Notification, NotificationBus};
use crate::constants::ERR_POISONED_LOCK;
use crate::error::{AcquireError, CircuitOpen, ResourceBusy};
use crate::name::ResourceName;

/// Per-call arguments for [`ProtectedResource::acquire`].
///
/// All fields are optional: the timeout falls back to the resource's configured
/// default, and `scope`/`adapter` only annotate the emitted events.
#[derive(Debug, Clone, Default)]
pub struct AcquireArgs {
    timeout: Option<Duration>,
    scope: Option<String>,
    adapter: Option<String>,
}

impl AcquireArgs {
    /// Creates empty arguments; everything falls back to resource defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides how long to wait for a bulkhead slot.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Names the logical operation, for events.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Names the calling adapter, for events.
    #[must_use]
    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }
}

/// Context handed to the protected block.
///
/// Adapters that can bound their own I/O should read
/// [`resource_timeout`][Self::resource_timeout] and apply it to their socket or
/// request deadline: while a breaker is probing half-open, the trial call runs
/// under a reduced timeout so a stuck dependency cannot hold the probe hostage.
#[derive(Debug)]
pub struct Call {
    resource_timeout: Option<Duration>,
}

impl Call {
    /// The deadline the protected operation should honor, if any.
    #[must_use]
    pub fn resource_timeout(&self) -> Option<Duration> {
        self.resource_timeout
    }
}

/// A named resource under breaker and bulkhead protection.
///
/// Resources are created and owned by the [`Engine`][crate::Engine]'s registry;
/// callers look one up by name and wrap every outbound operation in
/// [`acquire`][Self::acquire]. See the crate documentation for the full flow.
#[derive(Debug)]
pub struct ProtectedResource {
    name: ResourceName,
    breaker: Breaker,
    bulkhead: Option<Bulkhead>,
    bus: Arc<NotificationBus>,
    clock: Clock,
    default_timeout: Duration,
    updated_at: Mutex<Instant>,
}

impl ProtectedResource {
    pub(crate) fn new(
        name: ResourceName,
        breaker: Breaker,
        bulkhead: Option<Bulkhead>,
        bus: Arc<NotificationBus>,
        clock: &Clock,
        default_timeout: Duration,
    ) -> Self {
        let updated_at = Mutex::new(clock.instant());

        Self {
            name,
            breaker,
            bulkhead,
            bus,
            clock: clock.clone(),
            default_timeout,
            updated_at,
        }
    }

    /// Runs `operation` under the resource's protection.
    ///
    /// The call proceeds in three phases, failing fast at each gate:
    ///
    /// 1. The breaker decides whether the call may proceed; a rejection emits a
    ///    `circuit_open` event and returns [`AcquireError::Rejected`].
    /// 2. The bulkhead reserves a slot, waiting at most the configured timeout; an
    ///    exhausted bulkhead emits `busy` and returns [`AcquireError::Busy`].
    /// 3. The operation runs. Success is recorded and emits `success`; a failure
    ///    whose [`Blame`][culpable::Blame] marks circuits is recorded against the
    ///    breaker, and the caller's error is always returned untouched.
    ///
    /// Outcomes the operation does not produce are not recorded: if the caller
    /// aborts the block (for example by panicking), the breaker sees neither a
    /// success nor a failure, and the bulkhead slot is still released.
    pub fn acquire<T, E, F>(&self, args: AcquireArgs, operation: F) -> Result<T, AcquireError<E>>
    where
        E: Culpable + Debug,
        F: FnOnce(&Call) -> Result<T, E>,
    {
        self.touch();

        if !self.breaker.request_allowed() {
            self.publish(&args, Event::CircuitOpen);
            return Err(AcquireError::Rejected(CircuitOpen {
                name: self.name.clone(),
                cause: self.breaker.last_error(),
            }));
        }

        let timeout = args.timeout.unwrap_or(self.default_timeout);
        let waited_from = Instant::now();
        let permit = match &self.bulkhead {
            Some(bulkhead) => match bulkhead.acquire(timeout) {
                Ok(permit) => Some(permit),
                Err(full) => {
                    let waited = full.waited();
                    self.publish(&args, Event::Busy { waited });
                    return Err(AcquireError::Busy(ResourceBusy {
                        name: self.name.clone(),
                        timeout,
                        waited,
                    }));
                }
            },
            None => None,
        };
        let wait_time = waited_from.elapsed();

        let call = Call {
            resource_timeout: self.effective_resource_timeout(args.timeout),
        };
        let result = operation(&call);
        drop(permit);

        match result {
            Ok(value) => {
                self.breaker.mark_success();
                self.publish(&args, Event::Success { wait_time });
                Ok(value)
            }
            Err(error) => {
                if error.blame().marks_circuits() {
                    self.breaker.mark_failed(&format!("{error:?}"));
                }
                Err(AcquireError::Inner(error))
            }
        }
    }

    /// The resource's registered name.
    #[must_use]
    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    /// Records a success without going through [`acquire`][Self::acquire].
    pub fn mark_success(&self) {
        self.breaker.mark_success();
    }

    /// Records a dependency-blamed failure without going through
    /// [`acquire`][Self::acquire].
    pub fn mark_failed(&self, message: &str) {
        self.breaker.mark_failed(message);
    }

    /// Forces the breaker back to its pristine closed state.
    pub fn reset(&self) {
        self.breaker.reset();
    }

    /// Whether the breaker currently lets requests through.
    #[must_use]
    pub fn request_allowed(&self) -> bool {
        self.touch();
        self.breaker.request_allowed()
    }

    /// Whether the circuit is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Whether the circuit is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.breaker.is_closed()
    }

    /// Whether the circuit is half-open.
    #[must_use]
    pub fn is_half_open(&self) -> bool {
        self.breaker.is_half_open()
    }

    /// The current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Whether the breaker or the bulkhead reports recent activity.
    ///
    /// The registry never evicts a resource that is in use.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.breaker.in_use() || self.bulkhead.as_ref().is_some_and(Bulkhead::in_use)
    }

    /// A point-in-time view of the protecting breaker.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        self.breaker.metrics()
    }

    /// The protecting breaker.
    #[must_use]
    pub fn breaker(&self) -> &Breaker {
        &self.breaker
    }

    /// The attached bulkhead, if any.
    #[must_use]
    pub fn bulkhead(&self) -> Option<&Bulkhead> {
        self.bulkhead.as_ref()
    }

    /// When the resource was last touched, for LRU ordering.
    pub(crate) fn updated_at(&self) -> Instant {
        *self.updated_at.lock().expect(ERR_POISONED_LOCK)
    }

    pub(crate) fn touch(&self) {
        *self.updated_at.lock().expect(ERR_POISONED_LOCK) = self.clock.instant();
    }

    /// Tears down the breaker (stopping its background registration).
    pub(crate) fn destroy(&self) {
        self.breaker.destroy();
    }

    /// The deadline the protected block should honor.
    ///
    /// While half-open, the reduced probe timeout applies; a caller-supplied
    /// timeout lowers it further. Both bounds can apply to the same call, so the
    /// effective deadline is their minimum.
    fn effective_resource_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        match (self.breaker.half_open_resource_timeout(), requested) {
            (Some(probe), Some(requested)) => Some(probe.min(requested)),
            (Some(probe), None) => Some(probe),
            (None, _) => None,
        }
    }

    fn publish(&self, args: &AcquireArgs, event: Event) {
        self.bus.publish(&Notification::new(
            self.name.clone(),
            args.scope.clone(),
            args.adapter.clone(),
            event,
        ));
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use culpable::Blame;
    use metronome::ClockControl;
    use new_zealand::nz;

    use super::*;
    use crate::breaker::ClassicBreaker;
    use crate::options::ClassicOptions;

    #[derive(Debug)]
    enum StoreError {
        Down,
        BadQuery,
    }

    impl Culpable for StoreError {
        fn blame(&self) -> Blame {
            match self {
                StoreError::Down => Blame::dependency(),
                StoreError::BadQuery => Blame::caller(),
            }
        }
    }

    fn classic_breaker(clock: &Clock) -> Breaker {
        let options = ClassicOptions::builder()
            .error_threshold(2)
            .error_timeout(Duration::from_secs(15))
            .success_threshold(1)
            .half_open_resource_timeout(Duration::from_millis(500))
            .build()
            .expect("valid options");
        Breaker::Classic(ClassicBreaker::new(clock, options))
    }

    fn resource(clock: &Clock, breaker: Breaker, bulkhead: Option<Bulkhead>) -> ProtectedResource {
        ProtectedResource::new(
            ResourceName::from("db"),
            breaker,
            bulkhead,
            Arc::new(NotificationBus::new()),
            clock,
            Duration::ZERO,
        )
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(ProtectedResource: Send, Sync);
        static_assertions::assert_impl_all!(AcquireArgs: Send, Sync, Clone, Default);
    }

    #[test]
    fn successful_acquire_returns_the_block_value() {
        let clock = ClockControl::new().to_clock();
        let resource = resource(&clock, classic_breaker(&clock), None);

        let value: Result<_, AcquireError<StoreError>> = resource.acquire(AcquireArgs::new(), |_| Ok(42));

        assert_eq!(value.expect("block value"), 42);
        assert!(resource.is_closed());
    }

    #[test]
    fn dependency_faults_trip_the_breaker() {
        let clock = ClockControl::new().to_clock();
        let resource = resource(&clock, classic_breaker(&clock), None);

        for _ in 0..2 {
            let result: Result<(), _> = resource.acquire(AcquireArgs::new(), |_| Err(StoreError::Down));
            assert!(matches!(result, Err(AcquireError::Inner(StoreError::Down))));
        }

        assert!(resource.is_open());

        let rejected: Result<(), _> = resource.acquire::<(), StoreError, _>(AcquireArgs::new(), |_| unreachable!());
        let Err(AcquireError::Rejected(open)) = rejected else {
            panic!("expected a circuit-open rejection");
        };
        assert_eq!(open.name().as_str(), "db");
        assert_eq!(open.cause_message(), Some("Down"));
    }

    #[test]
    fn caller_faults_pass_through_unrecorded() {
        let clock = ClockControl::new().to_clock();
        let resource = resource(&clock, classic_breaker(&clock), None);

        for _ in 0..5 {
            let result: Result<(), _> = resource.acquire(AcquireArgs::new(), |_| Err(StoreError::BadQuery));
            assert!(matches!(result, Err(AcquireError::Inner(StoreError::BadQuery))));
        }

        assert!(resource.is_closed());
    }

    #[test]
    fn exhausted_bulkhead_returns_busy() {
        let clock = ClockControl::new().to_clock();
        let resource = resource(&clock, Breaker::Unprotected, Some(Bulkhead::new(nz!(1))));

        let outcome = resource.acquire::<_, StoreError, _>(AcquireArgs::new(), |_| {
            // While this block holds the only ticket, a second acquire fails fast.
            let nested = resource.acquire::<(), StoreError, _>(AcquireArgs::new(), |_| unreachable!());
            assert!(matches!(nested, Err(AcquireError::Busy(_))));
            Ok(())
        });

        assert!(outcome.is_ok());
        assert!(!resource.in_use());
    }

    #[test]
    fn busy_does_not_mark_the_breaker() {
        let clock = ClockControl::new().to_clock();
        let resource = resource(&clock, classic_breaker(&clock), Some(Bulkhead::new(nz!(1))));

        let _ = resource.acquire::<_, StoreError, _>(AcquireArgs::new(), |_| {
            for _ in 0..5 {
                let nested = resource.acquire::<(), StoreError, _>(AcquireArgs::new(), |_| unreachable!());
                assert!(matches!(nested, Err(AcquireError::Busy(_))));
            }
            Ok(())
        });

        assert!(resource.is_closed());
    }

    #[test]
    fn resource_timeout_appears_while_half_open() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let resource = resource(&clock, classic_breaker(&clock), None);

        let initial: Result<(), _> = resource.acquire(AcquireArgs::new(), |call: &Call| {
            assert_eq!(call.resource_timeout(), None);
            Err(StoreError::Down)
        });
        assert!(initial.is_err());
        let _: Result<(), _> = resource.acquire(AcquireArgs::new(), |_| Err(StoreError::Down));
        assert!(resource.is_open());

        control.advance(Duration::from_secs(15));

        let probed: Result<_, AcquireError<StoreError>> = resource.acquire(AcquireArgs::new(), |call: &Call| {
            assert_eq!(call.resource_timeout(), Some(Duration::from_millis(500)));
            Ok(())
        });
        assert!(probed.is_ok());
        assert!(resource.is_closed());
    }

    #[test]
    fn caller_timeout_lowers_the_probe_deadline() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let resource = resource(&clock, classic_breaker(&clock), None);

        let _: Result<(), _> = resource.acquire(AcquireArgs::new(), |_| Err(StoreError::Down));
        let _: Result<(), _> = resource.acquire(AcquireArgs::new(), |_| Err(StoreError::Down));
        control.advance(Duration::from_secs(15));

        let args = AcquireArgs::new().with_timeout(Duration::from_millis(100));
        let probed: Result<_, AcquireError<StoreError>> = resource.acquire(args, |call: &Call| {
            assert_eq!(call.resource_timeout(), Some(Duration::from_millis(100)));
            Ok(())
        });
        assert!(probed.is_ok());
    }

    #[test]
    fn events_describe_the_call_lifecycle() {
        let clock = ClockControl::new().to_clock();
        let bus = Arc::new(NotificationBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let _ = bus.subscribe(move |notification| {
            events_clone
                .lock()
                .expect("events lock")
                .push((notification.event.name(), notification.scope.clone()));
        });

        let resource = ProtectedResource::new(
            ResourceName::from("db"),
            classic_breaker(&clock),
            None,
            Arc::clone(&bus),
            &clock,
            Duration::ZERO,
        );

        let args = AcquireArgs::new().with_scope("query").with_adapter("sql");
        let _: Result<_, AcquireError<StoreError>> = resource.acquire(args.clone(), |_| Ok(()));
        let _: Result<(), _> = resource.acquire(args.clone(), |_| Err(StoreError::Down));
        let _: Result<(), _> = resource.acquire(args.clone(), |_| Err(StoreError::Down));
        let _: Result<(), _> = resource.acquire::<(), StoreError, _>(args, |_| unreachable!());

        assert_eq!(
            *events.lock().expect("events lock"),
            vec![
                ("success", Some("query".to_string())),
                ("circuit_open", Some("query".to_string())),
            ]
        );
    }

    #[test]
    fn updated_at_tracks_access() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let resource = resource(&clock, Breaker::Unprotected, None);

        let created = resource.updated_at();
        control.advance(Duration::from_secs(30));
        let _: Result<_, AcquireError<StoreError>> = resource.acquire(AcquireArgs::new(), |_| Ok(()));

        assert_eq!(resource.updated_at().duration_since(created), Duration::from_secs(30));
    }

    #[test]
    fn panicking_block_records_no_outcome_and_frees_the_slot() {
        let clock = ClockControl::new().to_clock();
        let resource = Arc::new(resource(&clock, classic_breaker(&clock), Some(Bulkhead::new(nz!(1)))));

        let resource_clone = Arc::clone(&resource);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _: Result<(), AcquireError<StoreError>> =
                resource_clone.acquire(AcquireArgs::new(), |_| panic!("caller aborted"));
        }));

        assert!(result.is_err());
        assert!(resource.is_closed());
        assert!(!resource.in_use());
    }
}
