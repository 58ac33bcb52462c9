// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metronome::Clock;

use crate::bus::{Event, Notification, NotificationBus};
use crate::constants::ERR_POISONED_LOCK;
use crate::name::ResourceName;
use crate::resource::ProtectedResource;

/// Name → resource map with LRU promotion and min-age garbage collection.
///
/// A name maps to at most one resource at any instant. [`get`][Self::get] promotes
/// the entry to most-recently-used; [`set`][Self::set] inserts and opportunistically
/// collects garbage when the map has outgrown its bound. Only entries that are both
/// older than `min_age` and not in use are evicted; the map may therefore exceed
/// `max_size` while everything in it is fresh or busy (correctness beats the bound).
///
/// One mutex protects the map. Collection is attempted only when a separate GC lock
/// can be taken without blocking, and only from `set`, never from `get`: lookups
/// stay cheap and collections never stack up.
#[derive(Debug)]
pub(crate) struct Registry {
    clock: Clock,
    bus: Arc<NotificationBus>,
    max_size: usize,
    min_age: Duration,
    store: Mutex<Store>,
    gc_lock: Mutex<()>,
}

#[derive(Debug, Default)]
struct Store {
    /// Names in least-recently-used-first order.
    order: VecDeque<ResourceName>,
    map: HashMap<ResourceName, Arc<ProtectedResource>>,
}

impl Store {
    fn promote(&mut self, name: &ResourceName) {
        if let Some(position) = self.order.iter().position(|candidate| candidate == name) {
            let _ = self.order.remove(position);
            self.order.push_back(name.clone());
        }
    }

    fn insert(&mut self, name: ResourceName, resource: Arc<ProtectedResource>) -> Option<Arc<ProtectedResource>> {
        let previous = self.map.insert(name.clone(), resource);
        if previous.is_some() {
            self.order.retain(|candidate| candidate != &name);
        }
        self.order.push_back(name);
        previous
    }

    fn remove(&mut self, name: &str) -> Option<Arc<ProtectedResource>> {
        let removed = self.map.remove(name);
        if removed.is_some() {
            self.order.retain(|candidate| candidate.as_str() != name);
        }
        removed
    }
}

impl Registry {
    pub fn new(clock: &Clock, bus: Arc<NotificationBus>, max_size: usize, min_age: Duration) -> Self {
        Self {
            clock: clock.clone(),
            bus,
            max_size,
            min_age,
            store: Mutex::new(Store::default()),
            gc_lock: Mutex::new(()),
        }
    }

    /// Looks a resource up and promotes it to most-recently-used.
    pub fn get(&self, name: &str) -> Option<Arc<ProtectedResource>> {
        let mut store = self.store.lock().expect(ERR_POISONED_LOCK);
        let resource = store.map.get(name).map(Arc::clone)?;

        let owned = resource.name().clone();
        store.promote(&owned);
        drop(store);

        resource.touch();
        Some(resource)
    }

    /// Inserts a resource, replacing and returning any previous holder of the name.
    ///
    /// When the map has outgrown its bound, an opportunistic collection runs after
    /// the insert.
    pub fn set(&self, resource: Arc<ProtectedResource>) -> Option<Arc<ProtectedResource>> {
        let name = resource.name().clone();
        let (previous, needs_gc) = {
            let mut store = self.store.lock().expect(ERR_POISONED_LOCK);
            let previous = store.insert(name.clone(), resource);
            (previous, store.map.len() > self.max_size)
        };

        if needs_gc {
            self.collect_garbage(&name);
        }
        previous
    }

    /// Removes a resource; the caller is responsible for destroying it.
    pub fn remove(&self, name: &str) -> Option<Arc<ProtectedResource>> {
        self.store.lock().expect(ERR_POISONED_LOCK).remove(name)
    }

    /// Registered names, least-recently-used first.
    pub fn names(&self) -> Vec<ResourceName> {
        self.store.lock().expect(ERR_POISONED_LOCK).order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.store.lock().expect(ERR_POISONED_LOCK).map.len()
    }

    /// Empties the registry, returning everything for teardown.
    pub fn drain(&self) -> Vec<Arc<ProtectedResource>> {
        let mut store = self.store.lock().expect(ERR_POISONED_LOCK);
        store.order.clear();
        store.map.drain().map(|(_, resource)| resource).collect()
    }

    /// Evicts stale, idle entries until the map is within its bound.
    ///
    /// Runs only when no other collection is in progress; destruction and event
    /// publication happen outside the map lock.
    fn collect_garbage(&self, triggered_by: &ResourceName) {
        let Ok(_gc) = self.gc_lock.try_lock() else {
            return;
        };
        let stopwatch = self.clock.stopwatch();

        let mut examined = 0_usize;
        let mut evicted = Vec::new();
        let size = {
            let mut store = self.store.lock().expect(ERR_POISONED_LOCK);
            let now = self.clock.instant();

            let candidates: Vec<ResourceName> = store.order.iter().cloned().collect();
            for name in candidates {
                if store.map.len() <= self.max_size {
                    break;
                }
                examined += 1;

                let evictable = store.map.get(&name).is_some_and(|resource| {
                    now.duration_since(resource.updated_at()) >= self.min_age && !resource.in_use()
                });
                if evictable && let Some(resource) = store.remove(name.as_str()) {
                    evicted.push(resource);
                }
            }
            store.map.len()
        };

        for resource in &evicted {
            resource.destroy();
        }

        self.bus.publish(&Notification::new(
            triggered_by.clone(),
            None,
            None,
            Event::RegistryGc {
                size,
                examined,
                cleared: evicted.len(),
                elapsed: stopwatch.elapsed(),
            },
        ));
    }
}
