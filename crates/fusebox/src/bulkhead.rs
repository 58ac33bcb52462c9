// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::num::NonZero;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::constants::ERR_POISONED_LOCK;

/// Caps the number of in-flight calls to one resource.
///
/// A bulkhead hands out a fixed number of tickets. [`acquire`][Self::acquire] blocks
/// up to the caller's timeout for a free ticket and fails fast once the budget is
/// spent, so a slow dependency can exhaust at most `tickets` worker threads instead
/// of the whole process.
///
/// Tickets are RAII: the returned [`BulkheadPermit`] frees its slot on drop, even
/// when the protected block panics.
///
/// This is the in-process implementation. Coordinating tickets across a group of
/// processes (shared-memory semaphores) is a deployment concern outside this crate.
#[derive(Debug)]
pub struct Bulkhead {
    tickets: usize,
    state: Mutex<State>,
    freed: Condvar,
}

#[derive(Debug)]
struct State {
    in_flight: usize,
    waiters: usize,
}

/// A held bulkhead ticket; dropping it frees the slot.
#[derive(Debug)]
pub struct BulkheadPermit<'a> {
    bulkhead: &'a Bulkhead,
}

/// No ticket became free within the allowed wait.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no free bulkhead slot within {waited:?}")]
pub struct BulkheadFull {
    waited: Duration,
}

impl BulkheadFull {
    /// How long the caller waited before giving up.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Bulkhead {
    pub(crate) fn new(tickets: NonZero<usize>) -> Self {
        Self {
            tickets: tickets.get(),
            state: Mutex::new(State { in_flight: 0, waiters: 0 }),
            freed: Condvar::new(),
        }
    }

    /// Reserves a ticket, waiting up to `timeout` for one to free up.
    ///
    /// A zero timeout turns the bulkhead into a pure fail-fast cap. The wait runs
    /// on the operating-system clock: a caller blocked here is occupying a real
    /// thread, so controlled test time does not apply.
    pub fn acquire(&self, timeout: Duration) -> Result<BulkheadPermit<'_>, BulkheadFull> {
        let started = Instant::now();
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        if state.in_flight < self.tickets {
            state.in_flight += 1;
            return Ok(BulkheadPermit { bulkhead: self });
        }

        state.waiters += 1;
        let deadline = started.checked_add(timeout);
        loop {
            let remaining = deadline.and_then(|deadline| deadline.checked_duration_since(Instant::now()));
            let Some(remaining) = remaining.filter(|remaining| !remaining.is_zero()) else {
                state.waiters -= 1;
                return Err(BulkheadFull {
                    waited: started.elapsed(),
                });
            };

            let (next, _timed_out) = self.freed.wait_timeout(state, remaining).expect(ERR_POISONED_LOCK);
            state = next;

            if state.in_flight < self.tickets {
                state.waiters -= 1;
                state.in_flight += 1;
                return Ok(BulkheadPermit { bulkhead: self });
            }
        }
    }

    /// The configured ticket count.
    #[must_use]
    pub fn tickets(&self) -> usize {
        self.tickets
    }

    /// The number of tickets currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().expect(ERR_POISONED_LOCK).in_flight
    }

    /// Whether any ticket is held or any caller is waiting for one.
    #[must_use]
    pub fn in_use(&self) -> bool {
        let state = self.state.lock().expect(ERR_POISONED_LOCK);
        state.in_flight > 0 || state.waiters > 0
    }
}

impl Drop for BulkheadPermit<'_> {
    fn drop(&mut self) {
        let mut state = self.bulkhead.state.lock().expect(ERR_POISONED_LOCK);
        state.in_flight -= 1;
        drop(state);
        self.bulkhead.freed.notify_one();
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use new_zealand::nz;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Bulkhead: Send, Sync);
        static_assertions::assert_impl_all!(BulkheadFull: Send, Sync, Clone);
    }

    #[test]
    fn permits_up_to_ticket_count() {
        let bulkhead = Bulkhead::new(nz!(2));

        let first = bulkhead.acquire(Duration::ZERO).expect("first slot");
        let second = bulkhead.acquire(Duration::ZERO).expect("second slot");
        assert_eq!(bulkhead.in_flight(), 2);

        let third = bulkhead.acquire(Duration::ZERO);
        assert!(third.is_err());

        drop(first);
        drop(second);
        assert_eq!(bulkhead.in_flight(), 0);
    }

    #[test]
    fn dropping_a_permit_frees_the_slot() {
        let bulkhead = Bulkhead::new(nz!(1));

        {
            let _permit = bulkhead.acquire(Duration::ZERO).expect("slot");
            assert!(bulkhead.in_use());
        }

        assert!(!bulkhead.in_use());
        let _permit = bulkhead.acquire(Duration::ZERO).expect("slot is free again");
    }

    #[test]
    fn waiting_caller_gets_the_freed_slot() {
        let bulkhead = Arc::new(Bulkhead::new(nz!(1)));
        let served = Arc::new(AtomicUsize::new(0));

        let permit = bulkhead.acquire(Duration::ZERO).expect("slot");

        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            let served = Arc::clone(&served);
            std::thread::spawn(move || {
                let _permit = bulkhead.acquire(Duration::from_secs(5)).expect("freed slot");
                served.fetch_add(1, Ordering::SeqCst);
            })
        };

        // Give the waiter time to block, then free the slot.
        std::thread::sleep(Duration::from_millis(50));
        drop(permit);

        waiter.join().expect("waiter thread panicked");
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timed_out_wait_reports_duration() {
        let bulkhead = Bulkhead::new(nz!(1));
        let _permit = bulkhead.acquire(Duration::ZERO).expect("slot");

        let error = bulkhead.acquire(Duration::from_millis(20)).expect_err("no slot");

        assert!(error.waited() >= Duration::from_millis(20));
    }

    #[test]
    fn failed_acquire_leaves_no_waiters_behind() {
        let bulkhead = Bulkhead::new(nz!(1));
        let permit = bulkhead.acquire(Duration::ZERO).expect("slot");

        let _ = bulkhead.acquire(Duration::from_millis(5));

        drop(permit);
        assert!(!bulkhead.in_use());
    }

    #[test]
    fn panic_in_the_protected_section_frees_the_slot() {
        let bulkhead = Arc::new(Bulkhead::new(nz!(1)));

        let bulkhead_clone = Arc::clone(&bulkhead);
        let result = std::panic::catch_unwind(move || {
            let _permit = bulkhead_clone.acquire(Duration::ZERO).expect("slot");
            panic!("boom");
        });

        assert!(result.is_err());
        assert!(!bulkhead.in_use());
    }
}
