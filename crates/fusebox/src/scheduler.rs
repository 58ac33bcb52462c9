// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use metronome::Clock;

use crate::constants::ERR_POISONED_LOCK;
use crate::pid::SharedPidController;

/// Drives adaptive controller updates from one background thread.
///
/// The scheduler owns a single thread per engine. It wakes every `interval`, asks
/// every registered controller to update if its window has elapsed, and goes back to
/// sleep. With no registered controllers the thread parks on a condvar until a
/// registration arrives, so idle engines cost nothing.
///
/// Shutdown is cooperative: a `stopped` flag is checked at the top of each
/// iteration, and [`stop`][Self::stop] joins the thread deterministically. A panic
/// from one controller's update is logged and swallowed; one bad breaker never
/// stops the scheduler.
#[derive(Debug)]
pub(crate) struct TickScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Removes its controller from the scheduler when dropped.
#[derive(Debug)]
pub(crate) struct TickRegistration {
    id: u64,
    shared: Weak<Shared>,
}

#[derive(Debug)]
struct Shared {
    clock: Clock,
    interval: Duration,
    stopped: AtomicBool,
    next_id: AtomicU64,
    controllers: DashMap<u64, Weak<SharedPidController>>,
    gate: Mutex<()>,
    wake: Condvar,
}

impl TickScheduler {
    pub fn new(clock: &Clock, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            clock: clock.clone(),
            interval,
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            controllers: DashMap::new(),
            gate: Mutex::new(()),
            wake: Condvar::new(),
        });

        let runner = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("fusebox-ticker".to_string())
            .spawn(move || runner.run())
            .expect("spawning the scheduler thread must succeed");

        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Registers a controller for periodic updates.
    ///
    /// Registration is atomic with respect to the scheduler loop: a parked scheduler
    /// wakes immediately. The controller is held weakly; dropping the returned
    /// registration (or the controller itself) removes it from the tick set.
    pub fn register(&self, controller: &Arc<SharedPidController>) -> TickRegistration {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let _gate = self.shared.gate.lock().expect(ERR_POISONED_LOCK);
        let _ = self.shared.controllers.insert(id, Arc::downgrade(controller));
        self.shared.wake.notify_all();

        TickRegistration {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Stops the scheduler and joins its thread.
    ///
    /// The tick in progress when `stop` is called completes; no further ticks run.
    /// Idempotent.
    pub fn stop(&self) {
        {
            let _gate = self.shared.gate.lock().expect(ERR_POISONED_LOCK);
            if self.shared.stopped.swap(true, Ordering::SeqCst) {
                return;
            }
            self.shared.wake.notify_all();
        }

        let handle = self.thread.lock().expect(ERR_POISONED_LOCK).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    #[cfg(test)]
    fn registered_count(&self) -> usize {
        self.shared.controllers.len()
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Drop for TickRegistration {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let _ = shared.controllers.remove(&self.id);
        }
    }
}

impl Shared {
    fn run(&self) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            self.sleep();

            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            self.tick();
        }
    }

    /// Parks until work exists, or sleeps one interval when it does. Both waits are
    /// interrupted by registrations and by `stop`.
    fn sleep(&self) {
        let mut gate = self.gate.lock().expect(ERR_POISONED_LOCK);

        if self.controllers.is_empty() {
            while self.controllers.is_empty() && !self.stopped.load(Ordering::SeqCst) {
                gate = self.wake.wait(gate).expect(ERR_POISONED_LOCK);
            }
        } else {
            let _ = self.wake.wait_timeout(gate, self.interval).expect(ERR_POISONED_LOCK);
        }
    }

    fn tick(&self) {
        let now = self.clock.instant();
        let mut dead = Vec::new();

        for entry in self.controllers.iter() {
            match entry.value().upgrade() {
                Some(controller) => {
                    let update = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        let _ = controller.maybe_update(now);
                    }));
                    if update.is_err() {
                        tracing::error!("adaptive controller update panicked; continuing with remaining breakers");
                    }
                }
                None => dead.push(*entry.key()),
            }
        }

        for id in dead {
            let _ = self.controllers.remove(&id);
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::AdaptiveOptions;
    use crate::pid::Outcome;

    fn controller() -> Arc<SharedPidController> {
        Arc::new(SharedPidController::new(
            &AdaptiveOptions::default().with_window(Duration::from_millis(1)),
        ))
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(TickScheduler: Send, Sync);
        static_assertions::assert_impl_all!(TickRegistration: Send, Sync);
    }

    #[test]
    fn stop_joins_deterministically() {
        let clock = Clock::new();
        let scheduler = TickScheduler::new(&clock, Duration::from_millis(1));

        scheduler.stop();
        scheduler.stop(); // idempotent
    }

    #[test]
    fn dropping_registration_removes_controller() {
        let clock = Clock::new();
        let scheduler = TickScheduler::new(&clock, Duration::from_millis(1));
        let controller = controller();

        let registration = scheduler.register(&controller);
        assert_eq!(scheduler.registered_count(), 1);

        drop(registration);
        assert_eq!(scheduler.registered_count(), 0);

        scheduler.stop();
    }

    #[test]
    fn registered_controller_receives_updates() {
        let clock = Clock::new();
        let scheduler = TickScheduler::new(&clock, Duration::from_millis(1));
        let controller = controller();
        let _registration = scheduler.register(&controller);

        for _ in 0..100 {
            controller.record(Outcome::Error);
        }

        // The 1ms window elapses almost immediately; wait for the scheduler to
        // pick it up.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while controller.metrics().rejection_rate == 0.0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(controller.metrics().rejection_rate > 0.0, "scheduler never drove an update");
        scheduler.stop();
    }

    #[test]
    fn dead_controllers_are_pruned() {
        let clock = Clock::new();
        let scheduler = TickScheduler::new(&clock, Duration::from_millis(1));
        let controller = controller();

        let registration = scheduler.register(&controller);
        drop(controller);

        // The registration is still alive, but the controller is gone; the next
        // tick prunes the entry.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while scheduler.registered_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(scheduler.registered_count(), 0);
        scheduler.stop();
        drop(registration);
    }
}
