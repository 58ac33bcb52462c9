// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::num::NonZero;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metronome::Clock;
use new_zealand::nz;

use crate::breaker::{AdaptiveBreaker, Breaker, ClassicBreaker, DualBreaker, Selector};
use crate::bulkhead::Bulkhead;
use crate::bus::{Event, Notification, NotificationBus};
use crate::constants::{DEFAULT_REGISTRY_MAX_SIZE, DEFAULT_REGISTRY_MIN_AGE, DEFAULT_SLIDING_INTERVAL};
use crate::error::RegisterError;
use crate::name::ResourceName;
use crate::options::{BreakerChoice, ResourceOptions};
use crate::registry::Registry;
use crate::resource::ProtectedResource;
use crate::scheduler::TickScheduler;

/// The kill-switches that collapse protection to a pass-through.
///
/// Read from process environment variables at engine construction (see
/// [`Environment::from_process_env`]); tests inject a fixed value through
/// [`EngineBuilder::environment`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Environment {
    disable_all: bool,
    disable_circuit_breaker: bool,
}

impl Environment {
    /// Everything enabled; the default.
    #[must_use]
    pub fn enabled() -> Self {
        Self::default()
    }

    /// Reads `FUSEBOX_DISABLE_ALL` and `FUSEBOX_DISABLE_CIRCUIT_BREAKER`.
    ///
    /// A variable counts as set when it is present and not `""`, `"0"`, or
    /// `"false"`.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self {
            disable_all: flag_set("FUSEBOX_DISABLE_ALL"),
            disable_circuit_breaker: flag_set("FUSEBOX_DISABLE_CIRCUIT_BREAKER"),
        }
    }

    /// Disables breakers and bulkheads: every resource is an unprotected
    /// pass-through.
    #[must_use]
    pub fn disable_all(mut self) -> Self {
        self.disable_all = true;
        self
    }

    /// Disables breakers only; bulkheads stay attached.
    #[must_use]
    pub fn disable_circuit_breaker(mut self) -> Self {
        self.disable_circuit_breaker = true;
        self
    }

    fn breakers_disabled(&self) -> bool {
        self.disable_all || self.disable_circuit_breaker
    }
}

fn flag_set(name: &str) -> bool {
    std::env::var(name)
        .map(|value| {
            let value = value.trim();
            !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
        })
        .unwrap_or(false)
}

/// Builder for [`Engine`].
#[derive(Debug)]
pub struct EngineBuilder {
    registry_max_size: usize,
    registry_min_age: Duration,
    sliding_interval: Duration,
    worker_count: Option<NonZero<usize>>,
    environment: Option<Environment>,
    selector: Selector,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            registry_max_size: DEFAULT_REGISTRY_MAX_SIZE,
            registry_min_age: DEFAULT_REGISTRY_MIN_AGE,
            sliding_interval: DEFAULT_SLIDING_INTERVAL,
            worker_count: None,
            environment: None,
            selector: Selector::new(|_| false),
        }
    }
}

impl EngineBuilder {
    /// Registry entries beyond this bound become eligible for collection.
    #[must_use]
    pub fn registry_max_size(mut self, max_size: usize) -> Self {
        self.registry_max_size = max_size;
        self
    }

    /// Registry entries younger than this are never evicted.
    #[must_use]
    pub fn registry_min_age(mut self, min_age: Duration) -> Self {
        self.registry_min_age = min_age;
        self
    }

    /// How often the background scheduler wakes to drive adaptive updates.
    #[must_use]
    pub fn sliding_interval(mut self, interval: Duration) -> Self {
        self.sliding_interval = interval;
        self
    }

    /// The worker count that bulkhead quotas are a fraction of.
    ///
    /// Defaults to the machine's available parallelism.
    #[must_use]
    pub fn worker_count(mut self, workers: NonZero<usize>) -> Self {
        self.worker_count = Some(workers);
        self
    }

    /// Overrides the environment kill-switches (instead of reading the process
    /// environment).
    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// The selector that routes dual breakers: `true` picks the adaptive child.
    ///
    /// One selector serves every dual-protected resource of the engine; it
    /// receives the resource's name on each call. The default routes everything
    /// to the classic child.
    #[must_use]
    pub fn dual_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&ResourceName) -> bool + Send + Sync + 'static,
    {
        self.selector = Selector::new(selector);
        self
    }

    /// Builds the engine on the given clock.
    #[must_use]
    pub fn build(self, clock: &Clock) -> Engine {
        let bus = Arc::new(NotificationBus::new());

        Engine {
            clock: clock.clone(),
            bus: Arc::clone(&bus),
            registry: Registry::new(clock, bus, self.registry_max_size, self.registry_min_age),
            scheduler: TickScheduler::new(clock, self.sliding_interval),
            environment: self.environment.unwrap_or_else(Environment::from_process_env),
            worker_count: self
                .worker_count
                .or_else(|| std::thread::available_parallelism().ok())
                .unwrap_or(nz!(1)),
            selector: self.selector,
            shut_down: AtomicBool::new(false),
        }
    }
}

/// The process-wide owner of protected resources.
///
/// An engine bundles everything resources share: the clock, the notification bus,
/// the registry that owns resource instances, and the background scheduler driving
/// adaptive breakers. There is deliberately no global instance: applications
/// create one engine at startup and hand it around; tests create a fresh engine per
/// case with a controlled clock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use fusebox::options::{ClassicOptions, ResourceOptions};
/// use fusebox::{AcquireArgs, Engine};
/// use metronome::Clock;
///
/// let engine = Engine::new(&Clock::new());
///
/// let options = ResourceOptions::classic(
///     ClassicOptions::builder()
///         .error_threshold(3)
///         .error_timeout(Duration::from_secs(15))
///         .success_threshold(2)
///         .build()?,
/// )
/// .with_tickets(4);
///
/// let db = engine.register("primary_db", options)?;
/// let value = db.acquire(AcquireArgs::new(), |_| Ok::<_, std::io::Error>(42));
/// # let _ = value;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    clock: Clock,
    bus: Arc<NotificationBus>,
    registry: Registry,
    scheduler: TickScheduler,
    environment: Environment,
    worker_count: NonZero<usize>,
    selector: Selector,
    shut_down: AtomicBool,
}

impl Engine {
    /// Creates an engine with default settings.
    #[must_use]
    pub fn new(clock: &Clock) -> Self {
        Self::builder().build(clock)
    }

    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Creates and registers a resource under `name`.
    ///
    /// Options are validated first; nothing is constructed from invalid options.
    /// An existing resource under the same name is replaced and destroyed.
    pub fn register(
        &self,
        name: impl Into<ResourceName>,
        options: ResourceOptions,
    ) -> Result<Arc<ProtectedResource>, RegisterError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegisterError::ShutDown);
        }
        options.validate()?;

        let name = options.name.clone().unwrap_or_else(|| name.into());
        let breaker = self.build_breaker(&name, &options);
        let bulkhead = self.build_bulkhead(&options);

        let resource = Arc::new(ProtectedResource::new(
            name,
            breaker,
            bulkhead,
            Arc::clone(&self.bus),
            &self.clock,
            options.acquire_timeout,
        ));

        if let Some(replaced) = self.registry.set(Arc::clone(&resource)) {
            replaced.destroy();
        }
        Ok(resource)
    }

    /// Returns the resource registered under `name`, registering it first if
    /// needed.
    pub fn retrieve_or_register(
        &self,
        name: impl Into<ResourceName>,
        options: ResourceOptions,
    ) -> Result<Arc<ProtectedResource>, RegisterError> {
        let name = name.into();
        if let Some(existing) = self.registry.get(name.as_str()) {
            return Ok(existing);
        }
        self.register(name, options)
    }

    /// Looks a resource up without registering anything.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ProtectedResource>> {
        self.registry.get(name)
    }

    /// Removes and destroys the resource registered under `name`.
    ///
    /// Returns whether a resource was registered.
    pub fn unregister(&self, name: &str) -> bool {
        match self.registry.remove(name) {
            Some(resource) => {
                resource.destroy();
                true
            }
            None => false,
        }
    }

    /// The engine's notification bus.
    #[must_use]
    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// The engine's clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Registered resource names, least-recently-used first.
    #[must_use]
    pub fn resource_names(&self) -> Vec<ResourceName> {
        self.registry.names()
    }

    /// Destroys every resource and stops the background scheduler.
    ///
    /// Idempotent; the engine rejects registrations afterwards. Also runs on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        for resource in self.registry.drain() {
            resource.destroy();
        }
        self.scheduler.stop();
    }

    fn build_breaker(&self, name: &ResourceName, options: &ResourceOptions) -> Breaker {
        if self.environment.breakers_disabled() {
            return Breaker::Unprotected;
        }

        match &options.breaker {
            BreakerChoice::Classic(classic) => {
                Breaker::Classic(self.classic_breaker(name, classic.clone()))
            }
            BreakerChoice::Adaptive(adaptive) => {
                Breaker::Adaptive(AdaptiveBreaker::new(&self.clock, adaptive, &self.scheduler))
            }
            BreakerChoice::Dual { classic, adaptive } => {
                let selector = self.selector.clone();
                let bus = Arc::clone(&self.bus);
                let event_name = name.clone();

                let dual = DualBreaker::new(
                    name.clone(),
                    self.classic_breaker(name, classic.clone()),
                    AdaptiveBreaker::new(&self.clock, adaptive, &self.scheduler),
                    move |resource: &ResourceName| selector.call(resource),
                )
                .on_mode_change(move |old, new| {
                    bus.publish(&Notification::new(
                        event_name.clone(),
                        None,
                        None,
                        Event::ModeChange { old, new },
                    ));
                });
                Breaker::Dual(dual)
            }
            BreakerChoice::Unprotected => Breaker::Unprotected,
        }
    }

    fn classic_breaker(&self, name: &ResourceName, options: crate::options::ClassicOptions) -> ClassicBreaker {
        let bus = Arc::clone(&self.bus);
        let event_name = name.clone();

        ClassicBreaker::new(&self.clock, options).on_state_change(move |state| {
            bus.publish(&Notification::new(
                event_name.clone(),
                None,
                None,
                Event::StateChange { state },
            ));
        })
    }

    fn build_bulkhead(&self, options: &ResourceOptions) -> Option<Bulkhead> {
        if self.environment.disable_all || !options.bulkhead {
            return None;
        }

        let tickets = match (options.tickets, options.quota) {
            (Some(tickets), _) => tickets as usize,
            (None, Some(quota)) => {
                #[expect(
                    clippy::cast_possible_truncation,
                    clippy::cast_precision_loss,
                    clippy::cast_sign_loss,
                    reason = "quota is validated to (0, 1] and worker counts are small"
                )]
                let derived = (quota * self.worker_count.get() as f64).ceil() as usize;
                derived.max(1)
            }
            (None, None) => return None,
        };

        NonZero::new(tickets).map(Bulkhead::new)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
