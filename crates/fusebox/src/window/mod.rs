// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Bounded sequences of recent observations.
//!
//! Breakers reason about "what happened recently", and these windows are the
//! primitives that define *recently*:
//!
//! - [`SlidingWindow`]: a bounded FIFO with no time semantics; the oldest item falls
//!   out when a new one arrives at capacity.
//! - [`SharedSlidingWindow`]: the same contract serialized under one lock, for use
//!   from multiple threads.
//! - [`TimeWindow`]: entries additionally expire by the monotonic clock; anything
//!   older than the configured span is gone by the next access.

mod sliding;
mod time;

pub use sliding::{SharedSlidingWindow, SlidingWindow};
pub use time::TimeWindow;
