// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::num::NonZero;
use std::time::{Duration, Instant};

/// A bounded sequence of timestamped values that expire by the monotonic clock.
///
/// Every [`push`][Self::push] first discards entries older than `now − span`, then
/// drops the oldest entry if the window is still at capacity. Reads go through
/// [`prune`][Self::prune] or the pruning convenience accessors so expired entries are
/// never observed.
///
/// Entries must be pushed with non-decreasing timestamps; the window is fed from a
/// monotonic clock.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
/// use std::time::{Duration, Instant};
///
/// use fusebox::window::TimeWindow;
///
/// let mut window = TimeWindow::new(Duration::from_secs(10), NonZero::new(8).unwrap());
/// let start = Instant::now();
///
/// window.push(start, "a");
/// window.push(start + Duration::from_secs(5), "b");
///
/// // 12 seconds in, "a" has expired.
/// assert_eq!(window.count(start + Duration::from_secs(12)), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TimeWindow<T> {
    entries: VecDeque<(Instant, T)>,
    span: Duration,
    max_size: NonZero<usize>,
}

impl<T> TimeWindow<T> {
    /// Creates an empty window covering `span` with at most `max_size` entries.
    #[must_use]
    pub fn new(span: Duration, max_size: NonZero<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            span,
            max_size,
        }
    }

    /// Appends a value observed at `now`.
    ///
    /// Expired entries are discarded first; if the window is still at capacity, the
    /// oldest entry is dropped to make room.
    pub fn push(&mut self, now: Instant, value: T) {
        self.prune(now);
        if self.entries.len() == self.max_size.get() {
            let _ = self.entries.pop_front();
        }

        self.entries.push_back((now, value));
    }

    /// Discards entries older than `now − span`.
    pub fn prune(&mut self, now: Instant) {
        let Some(horizon) = now.checked_sub(self.span) else {
            return;
        };

        while let Some((timestamp, _)) = self.entries.front()
            && *timestamp < horizon
        {
            let _ = self.entries.pop_front();
        }
    }

    /// The number of live entries as of `now`.
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.entries.len()
    }

    /// Whether any entry is live as of `now`.
    pub fn is_active(&mut self, now: Instant) -> bool {
        self.count(now) > 0
    }

    /// The newest live entry, as of the last prune.
    #[must_use]
    pub fn newest(&self) -> Option<&(Instant, T)> {
        self.entries.back()
    }

    /// The oldest live entry, as of the last prune.
    #[must_use]
    pub fn oldest(&self) -> Option<&(Instant, T)> {
        self.entries.front()
    }

    /// The covered span.
    #[must_use]
    pub fn span(&self) -> Duration {
        self.span
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates live entries from oldest to newest, as of the last prune.
    pub fn iter(&self) -> impl Iterator<Item = &(Instant, T)> {
        self.entries.iter()
    }
}
