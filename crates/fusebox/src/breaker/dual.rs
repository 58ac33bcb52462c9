// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{AdaptiveBreaker, BreakerMetrics, BreakerMode, CircuitState, ClassicBreaker, OnModeChange, Selector};
use crate::ResourceName;
use crate::constants::ERR_POISONED_LOCK;

/// A classic and an adaptive breaker running side by side for one resource.
///
/// Every call is routed to exactly one child, the *active* breaker, picked by a
/// selector predicate evaluated per call (`true` selects the adaptive child). The
/// inactive child still observes every outcome: `mark_success` and `mark_failed`
/// fan out to both children under one recording lock, so both see the identical
/// outcome sequence and the inactive breaker is warm the moment the selector flips.
///
/// A selector that panics is treated as "classic, for safety": the panic is caught,
/// logged once per breaker, and routing falls back to the classic child. The
/// children never call into each other.
#[derive(Debug)]
pub struct DualBreaker {
    name: ResourceName,
    classic: ClassicBreaker,
    adaptive: AdaptiveBreaker,
    selector: Selector,
    active: Mutex<BreakerMode>,
    record_lock: Mutex<()>,
    selector_warned: AtomicBool,
    on_mode_change: Option<OnModeChange>,
}

impl DualBreaker {
    pub(crate) fn new<F>(name: ResourceName, classic: ClassicBreaker, adaptive: AdaptiveBreaker, selector: F) -> Self
    where
        F: Fn(&ResourceName) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            classic,
            adaptive,
            selector: Selector::new(selector),
            active: Mutex::new(BreakerMode::Classic),
            record_lock: Mutex::new(()),
            selector_warned: AtomicBool::new(false),
            on_mode_change: None,
        }
    }

    /// Installs an observer invoked when the active breaker flips.
    ///
    /// The observer runs on the thread whose call detected the flip, outside the
    /// breaker's locks.
    #[must_use]
    pub(crate) fn on_mode_change<F>(mut self, observer: F) -> Self
    where
        F: Fn(BreakerMode, BreakerMode) + Send + Sync + 'static,
    {
        self.on_mode_change = Some(OnModeChange::new(observer));
        self
    }

    /// Whether the next request may proceed, as judged by the active child.
    ///
    /// Evaluates the selector, records the active-breaker pointer, and emits a mode
    /// change when it flipped since the previous call.
    #[must_use]
    pub fn request_allowed(&self) -> bool {
        let mode = self.route();

        match mode {
            BreakerMode::Classic => self.classic.request_allowed(),
            BreakerMode::Adaptive => self.adaptive.request_allowed(),
        }
    }

    /// Records a successful call with both children.
    pub fn mark_success(&self) {
        let _guard = self.record_lock.lock().expect(ERR_POISONED_LOCK);
        self.classic.mark_success();
        self.adaptive.mark_success();
    }

    /// Records a failed call with both children.
    pub fn mark_failed(&self, message: &str) {
        let _guard = self.record_lock.lock().expect(ERR_POISONED_LOCK);
        self.classic.mark_failed(message);
        self.adaptive.mark_failed(message);
    }

    /// Resets both children.
    pub fn reset(&self) {
        let _guard = self.record_lock.lock().expect(ERR_POISONED_LOCK);
        self.classic.reset();
        self.adaptive.reset();
    }

    /// The active child's circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.active_mode() {
            BreakerMode::Classic => self.classic.state(),
            BreakerMode::Adaptive => self.adaptive.state(),
        }
    }

    /// Whether either child has observed recent activity.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.classic.in_use() || self.adaptive.in_use()
    }

    /// The active child's view of the last failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        match self.active_mode() {
            BreakerMode::Classic => self.classic.last_error(),
            BreakerMode::Adaptive => self.adaptive.last_error(),
        }
    }

    /// The classic child's reduced trial-call timeout, when it is active and probing.
    #[must_use]
    pub fn half_open_resource_timeout(&self) -> Option<Duration> {
        match self.active_mode() {
            BreakerMode::Classic => self.classic.half_open_resource_timeout(),
            BreakerMode::Adaptive => None,
        }
    }

    /// Merged views of both children plus the active-breaker pointer.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        BreakerMetrics::Dual {
            active: self.active_mode(),
            classic: self.classic.metrics(),
            adaptive: self.adaptive.metrics(),
        }
    }

    /// The child currently authoritative for calls.
    #[must_use]
    pub fn active_mode(&self) -> BreakerMode {
        *self.active.lock().expect(ERR_POISONED_LOCK)
    }

    /// Tears down both children.
    pub fn destroy(&self) {
        self.classic.reset();
        self.adaptive.destroy();
    }

    /// Evaluates the selector, updates the active pointer, and reports flips.
    fn route(&self) -> BreakerMode {
        let mode = match std::panic::catch_unwind(AssertUnwindSafe(|| self.selector.call(&self.name))) {
            Ok(true) => BreakerMode::Adaptive,
            Ok(false) => BreakerMode::Classic,
            Err(_) => {
                if !self.selector_warned.swap(true, Ordering::SeqCst) {
                    tracing::warn!(resource = %self.name, "breaker selector panicked; routing to the classic breaker");
                }
                BreakerMode::Classic
            }
        };

        let previous = {
            let mut active = self.active.lock().expect(ERR_POISONED_LOCK);
            std::mem::replace(&mut *active, mode)
        };

        if previous != mode
            && let Some(observer) = &self.on_mode_change
        {
            observer.call(previous, mode);
        }

        mode
    }
}
