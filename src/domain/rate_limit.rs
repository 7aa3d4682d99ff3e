//! Fixed-window rate limiting state, embedded per connection.
//!
//! A deliberately approximate limiter: requests are counted in discrete,
//! non-overlapping windows, so a client can burst up to `2 × max_requests`
//! across a window boundary. The trade is O(1) cost per request versus the
//! bookkeeping of a sliding window.

use std::time::{Duration, Instant};

/// Per-connection fixed-window request counter.
#[derive(Debug, Clone)]
pub struct RateLimiterState {
    window_start: Instant,
    request_count: u32,
    window: Duration,
    max_requests: u32,
}

impl RateLimiterState {
    /// Creates a fresh limiter whose first window starts now.
    #[must_use]
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window_start: Instant::now(),
            request_count: 0,
            window,
            max_requests,
        }
    }

    /// Records one request at `now` and returns whether it is allowed.
    ///
    /// The window resets whenever `now - window_start >= window`. A request
    /// that would exceed `max_requests` is rejected and not counted, so
    /// exactly `max_requests` requests succeed per window.
    pub fn check(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.request_count = 0;
        }
        if self.request_count >= self.max_requests {
            return false;
        }
        self.request_count = self.request_count.saturating_add(1);
        true
    }

    /// Returns the number of requests counted in the current window.
    #[must_use]
    pub const fn current_count(&self) -> u32 {
        self.request_count
    }
}
