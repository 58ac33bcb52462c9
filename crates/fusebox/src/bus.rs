// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Single-process publish/subscribe for resource events.
//!
//! Every noteworthy moment in a resource's life (a successful acquisition, a
//! rejection, a state transition, a registry eviction) is published as a
//! [`Notification`] on the engine's bus. Delivery is synchronous, in registration
//! order, on the publisher's thread: subscribers must be non-blocking and
//! side-effect-safe, because a slow subscriber slows every publisher.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::ResourceName;
use crate::breaker::{BreakerMode, CircuitState};
use crate::callbacks::define_fn_wrapper;
use crate::constants::ERR_POISONED_LOCK;

define_fn_wrapper!(EventCallback(Fn(notification: &Notification)));

/// What happened, with its event-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    /// A protected call completed; `wait_time` is the bulkhead wait.
    Success {
        /// How long the caller waited for a bulkhead slot.
        wait_time: Duration,
    },

    /// The bulkhead had no slot within the caller's timeout.
    Busy {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// The breaker rejected the call outright.
    CircuitOpen,

    /// A breaker transitioned between circuit states.
    StateChange {
        /// The state entered.
        state: CircuitState,
    },

    /// A dual breaker's active child flipped.
    ModeChange {
        /// The previously active child.
        old: BreakerMode,
        /// The newly active child.
        new: BreakerMode,
    },

    /// The registry garbage-collected evictable entries.
    RegistryGc {
        /// Registry size after collection.
        size: usize,
        /// Entries examined.
        examined: usize,
        /// Entries evicted.
        cleared: usize,
        /// Time the collection took.
        elapsed: Duration,
    },
}

impl Event {
    /// The wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Busy { .. } => "busy",
            Self::CircuitOpen => "circuit_open",
            Self::StateChange { .. } => "state_change",
            Self::ModeChange { .. } => "circuit_breaker_mode_change",
            Self::RegistryGc { .. } => "lru_hash_gc",
        }
    }
}

/// An [`Event`] together with where it happened.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The resource the event concerns.
    pub resource: ResourceName,
    /// The caller-supplied operation scope, if any.
    pub scope: Option<String>,
    /// The adapter that made the call, if any.
    pub adapter: Option<String>,
    /// What happened.
    pub event: Event,
}

impl Notification {
    pub(crate) fn new(resource: ResourceName, scope: Option<String>, adapter: Option<String>, event: Event) -> Self {
        Self {
            resource,
            scope,
            adapter,
            event,
        }
    }
}

/// Identifies one subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Synchronous fan-out of [`Notification`]s to subscribers.
#[derive(Debug, Default)]
pub struct NotificationBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_token: AtomicU64,
}

#[derive(Debug)]
struct Subscriber {
    token: u64,
    filter: Option<ResourceName>,
    callback: EventCallback,
}

impl NotificationBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every resource's events.
    ///
    /// The callback runs synchronously on each publisher's thread; keep it fast and
    /// free of locks that publishers might hold.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.add_subscriber(None, EventCallback::new(callback))
    }

    /// Subscribes to one resource's events only.
    pub fn subscribe_to<F>(&self, resource: impl Into<ResourceName>, callback: F) -> SubscriptionToken
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.add_subscriber(Some(resource.into()), EventCallback::new(callback))
    }

    /// Removes a subscription; returns whether it existed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers.lock().expect(ERR_POISONED_LOCK);
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.token != token.0);
        subscribers.len() != before
    }

    /// Delivers a notification to every matching subscriber, in registration order.
    pub(crate) fn publish(&self, notification: &Notification) {
        // Callbacks are invoked outside the subscriber lock so a subscriber may
        // (un)subscribe without deadlocking.
        let callbacks: Vec<EventCallback> = {
            let subscribers = self.subscribers.lock().expect(ERR_POISONED_LOCK);
            subscribers
                .iter()
                .filter(|subscriber| {
                    subscriber
                        .filter
                        .as_ref()
                        .is_none_or(|filter| *filter == notification.resource)
                })
                .map(|subscriber| subscriber.callback.clone())
                .collect()
        };

        for callback in callbacks {
            callback.call(notification);
        }
    }

    fn add_subscriber(&self, filter: Option<ResourceName>, callback: EventCallback) -> SubscriptionToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().expect(ERR_POISONED_LOCK).push(Subscriber {
            token,
            filter,
            callback,
        });
        SubscriptionToken(token)
    }
}
